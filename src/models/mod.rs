mod reading;

pub use reading::{DomainBand, Field, Reading};
