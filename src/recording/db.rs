use async_trait::async_trait;
use mongodb::bson;

use crate::database::MongoRecordingStore;
use crate::error::Error;

use super::{VoiceRecording, VoiceRecordingId};

#[async_trait]
pub trait RecordingStore: Send + Sync {
    async fn insert_recording(&self, recording: &VoiceRecording) -> Result<(), Error>;

    async fn fetch_recording_by_id(
        &self,
        recording_id: VoiceRecordingId,
    ) -> Result<Option<VoiceRecording>, Error>;
}

#[async_trait]
impl RecordingStore for MongoRecordingStore {
    #[tracing::instrument(skip(self))]
    async fn insert_recording(&self, recording: &VoiceRecording) -> Result<(), Error> {
        self.insert_one(recording, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_recording_by_id(
        &self,
        recording_id: VoiceRecordingId,
    ) -> Result<Option<VoiceRecording>, Error> {
        let recording: Option<VoiceRecording> = self
            .find_one(bson::doc! { "_id": recording_id }, None)
            .await?;

        Ok(recording)
    }
}
