//! Pipeline services: decryption, structural parsing, sampling, license
//! resolution, object retrieval and start-point inference

pub mod decryptor;
pub mod epub;
pub mod inference;
pub mod license;
pub mod object_store;
pub mod sampler;

pub use inference::{InferenceClient, InferenceSettings};
pub use license::{DatabaseLicenseResolver, KeyServiceResolver, LicenseResolver};
pub use object_store::{HttpObjectStore, LocalObjectStore, ObjectStore};
