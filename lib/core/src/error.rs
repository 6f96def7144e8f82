//! Error handling foundation for the trellis workspace.
//!
//! Only the `Result` alias lives here. Each crate owns its domain error
//! enums and reports them through `rootcause::Report`, so callers can
//! attach context as errors cross layers.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
///
/// The context type defaults to `()` for call sites that only forward
/// reports they received.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Broken;

    impl fmt::Display for Broken {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "broken")
        }
    }

    impl std::error::Error for Broken {}

    fn fails() -> Result<u8, Broken> {
        Err(Broken.into())
    }

    #[test]
    fn result_type_works() {
        let ok: Result<i32> = Ok(42);
        assert_eq!(ok.expect("should be ok"), 42);
    }

    #[test]
    fn typed_context_is_preserved() {
        let err = fails().unwrap_err();
        assert_eq!(err.current_context().to_string(), "broken");
    }
}
