pub mod blip;
pub mod model;
