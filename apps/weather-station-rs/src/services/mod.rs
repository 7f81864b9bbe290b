pub mod readings;
pub mod sampler;
pub mod series_encoder;
