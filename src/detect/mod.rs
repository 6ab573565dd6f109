pub mod openalpr;

pub use openalpr::{DEFAULT_COUNTRY_CODE, Detection, PlateDetector, PlateResult, Point};
