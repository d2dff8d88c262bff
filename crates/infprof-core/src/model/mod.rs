//! Data model shared by collectors, storage and export.

mod reading;
mod sample;
mod value;

pub use reading::{Bucket, Fields, FieldsExt, Histogram, Reading};
pub use sample::{Sample, StaticInfo};
pub use value::Value;
