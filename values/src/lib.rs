//! # xmodal Values
//!
//! Tensor values shared by every xmodal crate.
//!
//! - [`Tensor`]: owned, typed, row-major n-dimensional buffer
//! - [`TensorMap`]: named tensors, the unit exchanged with model sessions
//! - [`math`]: stable softmax, top-k and the other numeric helpers used by
//!   post-processing
//!
//! ## Usage Example
//!
//! ```rust
//! use xmodal_values::{math, Tensor, TensorMap};
//!
//! let logits = Tensor::from_f32(vec![1.0, 2.0, 3.0], vec![1, 3]).unwrap();
//! let inputs = TensorMap::new().with("logits", logits);
//!
//! let row = inputs.require("logits").unwrap().as_f32().unwrap();
//! let best = math::top_k(&math::softmax(row), Some(1));
//! assert_eq!(best[0].0, 2);
//! ```

pub mod error;
pub mod map;
pub mod math;
pub mod tensor;
pub mod types;

pub use error::{ValueError, ValueResult};
pub use map::TensorMap;
pub use tensor::{Tensor, TensorData};
pub use types::TensorDataType;
