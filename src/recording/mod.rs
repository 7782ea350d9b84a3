use serde::{Deserialize, Serialize};

use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;

pub type VoiceRecordingId = TypedId<VoiceRecording>;

/// An uploaded robocall audio asset. Upload/transcoding happens upstream;
/// the engine only needs the reference to resolve at validation time and
/// the playback url to hand to the voice provider.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VoiceRecording {
    #[serde(rename = "_id")]
    pub id: VoiceRecordingId,
    pub name: String,
    pub url: String,
}

impl TypedIdMarker for VoiceRecording {
    fn tag() -> &'static str {
        "REC"
    }
}
