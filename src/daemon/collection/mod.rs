pub mod afk;
pub mod sampler;
