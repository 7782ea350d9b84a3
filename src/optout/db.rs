use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson;
use mongodb::Database;

use crate::database::MongoOptOutStore;
use crate::error::Error;

use super::{OptOutRecord, OptOutScope};

const OPT_OUTS: &str = "opt_outs";

pub async fn initialize(db: &Database) -> Result<(), Error> {
    db.run_command(
        bson::doc! {
            "createIndexes": OPT_OUTS,
            "indexes": [
                {
                    "key": { "phone_number": 1, "scope": 1 },
                    "name": "by_phone_and_scope",
                    "unique": true,
                },
            ]
        },
        None,
    )
    .await?;

    Ok(())
}

#[async_trait]
pub trait OptOutStore: Send + Sync {
    async fn insert_opt_out(&self, opt_out: &OptOutRecord) -> Result<(), Error>;

    async fn fetch_opt_outs(&self) -> Result<Vec<OptOutRecord>, Error>;

    /// Active records whose scope is any of the given ones; the callers
    /// pass the scopes that cover a channel (`All` plus the channel's own).
    async fn fetch_opt_outs_by_scopes(
        &self,
        scopes: &[OptOutScope],
    ) -> Result<Vec<OptOutRecord>, Error>;

    async fn fetch_opt_out(
        &self,
        phone_number: &str,
        scope: OptOutScope,
    ) -> Result<Option<OptOutRecord>, Error>;

    async fn delete_opt_out(&self, phone_number: &str, scope: OptOutScope)
        -> Result<bool, Error>;
}

#[async_trait]
impl OptOutStore for MongoOptOutStore {
    #[tracing::instrument(skip(self))]
    async fn insert_opt_out(&self, opt_out: &OptOutRecord) -> Result<(), Error> {
        self.insert_one(opt_out, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_opt_outs(&self) -> Result<Vec<OptOutRecord>, Error> {
        let opt_outs: Vec<OptOutRecord> =
            self.find(bson::doc! {}, None).await?.try_collect().await?;

        Ok(opt_outs)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_opt_outs_by_scopes(
        &self,
        scopes: &[OptOutScope],
    ) -> Result<Vec<OptOutRecord>, Error> {
        let scopes: Vec<&'static str> = scopes.iter().map(|scope| scope.as_str()).collect();

        let opt_outs: Vec<OptOutRecord> = self
            .find(bson::doc! { "scope": { "$in": scopes } }, None)
            .await?
            .try_collect()
            .await?;

        Ok(opt_outs)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_opt_out(
        &self,
        phone_number: &str,
        scope: OptOutScope,
    ) -> Result<Option<OptOutRecord>, Error> {
        let opt_out: Option<OptOutRecord> = self
            .find_one(
                bson::doc! { "phone_number": phone_number, "scope": scope },
                None,
            )
            .await?;

        Ok(opt_out)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_opt_out(
        &self,
        phone_number: &str,
        scope: OptOutScope,
    ) -> Result<bool, Error> {
        let result = self
            .delete_one(
                bson::doc! { "phone_number": phone_number, "scope": scope },
                None,
            )
            .await?;

        Ok(result.deleted_count > 0)
    }
}
