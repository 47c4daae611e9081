pub mod get_artifact;
pub mod put_artifact;

pub use get_artifact::{
    GetArtifactOperation, GetArtifactOperationOutcome, GetArtifactOperationRequest,
};
pub use put_artifact::{
    PutArtifactOperation, PutArtifactOperationRequest, PutArtifactOperationResult,
};
