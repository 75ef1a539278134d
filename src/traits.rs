use crate::discovery::Reading;

/// A report section that picks the properties it knows about.
pub trait HandleProperty {
    /// Returns `false` when `key` does not belong to this section.
    fn handle_property(&mut self, key: &str, reading: &Reading) -> bool;
}
