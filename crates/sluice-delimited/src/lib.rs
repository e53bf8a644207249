//! Delimited text codec components for Sluice.
//!
//! - `parse-delimited`: raw text lines → records of the output model
//! - `format-delimited`: records of the input model → raw text lines
//!
//! Both sides bind attributes to columns through the per-attribute
//! `delimited.formatter.attribute.ordinal` setting. Ordinals fix relative
//! order only; gaps are ignored, so a line formatted and then parsed with the
//! same bindings yields the same record.

mod config;
mod formatter;
mod parser;

pub use config::{
    ATTRIBUTE_FORMAT_FUNCTION, ATTRIBUTE_ORDINAL, DELIMITER, ENCODING, FORMATTER_DELIMITER,
    FORMATTER_QUOTE_CHARACTER, HEADER_LINES, ORDINAL_COLLISION, QUOTE_CHARACTER, TextFormat,
};
pub use formatter::DelimitedFormatter;
pub use parser::DelimitedParser;

use rhi_sluice_core::ComponentRegistry;

/// Register the delimited parser and formatter with the registry.
pub fn register_all(registry: &mut ComponentRegistry) {
    registry.register::<DelimitedParser>();
    registry.register::<DelimitedFormatter>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all() {
        let mut registry = ComponentRegistry::new();
        register_all(&mut registry);

        assert!(registry.contains("parse-delimited"));
        assert!(registry.contains("format-delimited"));
        assert_eq!(registry.len(), 2);
    }
}
