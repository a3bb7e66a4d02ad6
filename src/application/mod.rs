pub mod use_cases;

pub use use_cases::spec_conversion::SpecConversionUseCase;
