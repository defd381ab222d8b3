pub mod reconcile;
pub mod remote;
pub mod snapshot;
pub mod translate;
pub mod webcam;

pub use reconcile::{reconcile_images, LayerAction, LayerOutcome, ReconcileSummary};
pub use remote::{ObsClient, RemoteCall};
pub use snapshot::describe_state;
pub use translate::{
    translate_and_execute, AttemptReport, OpenAiCompleter, TextCompletion, TranslateError,
    TranslateSummary, MAX_ATTEMPTS,
};
pub use webcam::{provision_webcam, ProvisionError, ProvisionSummary, WebcamConfig};
