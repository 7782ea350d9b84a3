use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson;

use crate::database::MongoTagStore;
use crate::error::Error;

use super::{Tag, TagId};

#[async_trait]
pub trait TagStore: Send + Sync {
    async fn insert_tag(&self, tag: &Tag) -> Result<(), Error>;

    async fn fetch_tags(&self) -> Result<Vec<Tag>, Error>;

    async fn fetch_tag_by_id(&self, tag_id: TagId) -> Result<Option<Tag>, Error>;
}

#[async_trait]
impl TagStore for MongoTagStore {
    #[tracing::instrument(skip(self))]
    async fn insert_tag(&self, tag: &Tag) -> Result<(), Error> {
        self.insert_one(tag, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_tags(&self) -> Result<Vec<Tag>, Error> {
        let tags: Vec<Tag> = self.find(bson::doc! {}, None).await?.try_collect().await?;

        Ok(tags)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_tag_by_id(&self, tag_id: TagId) -> Result<Option<Tag>, Error> {
        let tag: Option<Tag> = self.find_one(bson::doc! { "_id": tag_id }, None).await?;

        Ok(tag)
    }
}
