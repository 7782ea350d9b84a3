use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson;
use mongodb::Database;

use crate::database::MongoVoterStore;
use crate::error::Error;
use crate::tag::TagId;

use super::Voter;

const VOTERS: &str = "voters";

pub async fn initialize(db: &Database) -> Result<(), Error> {
    db.run_command(
        bson::doc! {
            "createIndexes": VOTERS,
            "indexes": [
                { "key": { "zip_code": 1 }, "name": "by_zip_code" },
                { "key": { "tag_ids": 1 }, "name": "by_tag_ids" },
            ]
        },
        None,
    )
    .await?;

    Ok(())
}

#[async_trait]
pub trait VoterStore: Send + Sync {
    async fn insert_voter(&self, voter: &Voter) -> Result<(), Error>;

    async fn fetch_voters_by_zip(&self, zip_code: &str) -> Result<Vec<Voter>, Error>;

    async fn fetch_voters_by_tag(&self, tag_id: TagId) -> Result<Vec<Voter>, Error>;
}

#[async_trait]
impl VoterStore for MongoVoterStore {
    #[tracing::instrument(skip(self))]
    async fn insert_voter(&self, voter: &Voter) -> Result<(), Error> {
        self.insert_one(voter, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_voters_by_zip(&self, zip_code: &str) -> Result<Vec<Voter>, Error> {
        let voters: Vec<Voter> = self
            .find(bson::doc! { "zip_code": zip_code }, None)
            .await?
            .try_collect()
            .await?;

        Ok(voters)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_voters_by_tag(&self, tag_id: TagId) -> Result<Vec<Voter>, Error> {
        let voters: Vec<Voter> = self
            .find(bson::doc! { "tag_ids": tag_id }, None)
            .await?
            .try_collect()
            .await?;

        Ok(voters)
    }
}
