pub mod io;
pub mod kernels;
pub mod model;
pub mod progress;

pub use io::Dataset;
pub use kernels::{ShapeError, partial_likelihood, weighted_parameter_update};
pub use model::BernoulliMixture;
