use actix_web::web::{Data, Json};
use actix_web::{delete, get, post, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::Actor;
use crate::database::Database;
use crate::error::Error;
use crate::utils::SuccessBody;
use crate::voter::VoterId;

use super::manager::{self, NewOptOut, OptOutStats};
use super::{OptOutId, OptOutMethod, OptOutRecord, OptOutScope};

#[derive(Clone, Debug, Serialize)]
pub struct OptOutBody {
    pub id: OptOutId,
    pub phone_number: String,
    pub scope: OptOutScope,
    pub method: OptOutMethod,
    pub opted_out_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub voter_id: Option<VoterId>,
}

impl OptOutBody {
    fn render(opt_out: OptOutRecord) -> OptOutBody {
        OptOutBody {
            id: opt_out.id,
            phone_number: opt_out.phone_number,
            scope: opt_out.scope,
            method: opt_out.method,
            opted_out_at: opt_out.opted_out_at,
            reason: opt_out.reason,
            voter_id: opt_out.voter_id,
        }
    }
}

#[get("/opt-out")]
#[tracing::instrument(skip(db))]
pub async fn get_opt_outs(db: Data<dyn Database>, _actor: Actor) -> Result<Json<Vec<OptOutBody>>, Error> {
    let opt_outs = manager::get_opt_outs(db.get_ref()).await?;

    Ok(Json(opt_outs.into_iter().map(OptOutBody::render).collect()))
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateOptOutBody {
    pub phone_number: String,
    pub scope: OptOutScope,
    #[serde(default = "default_method")]
    pub method: OptOutMethod,
    pub reason: Option<String>,
    pub voter_id: Option<VoterId>,
}

fn default_method() -> OptOutMethod {
    OptOutMethod::Manual
}

#[post("/opt-out")]
#[tracing::instrument(skip(db, body))]
pub async fn create_opt_out(
    db: Data<dyn Database>,
    _actor: Actor,
    body: Json<CreateOptOutBody>,
) -> Result<Json<OptOutBody>, Error> {
    let body = body.into_inner();

    let opt_out = manager::create_opt_out(
        db.get_ref(),
        NewOptOut {
            phone_number: body.phone_number,
            scope: body.scope,
            method: body.method,
            reason: body.reason,
            voter_id: body.voter_id,
        },
    )
    .await?;

    Ok(Json(OptOutBody::render(opt_out)))
}

#[derive(Clone, Debug, Deserialize)]
pub struct DeleteOptOutBody {
    pub phone_number: String,
    pub scope: OptOutScope,
}

#[delete("/opt-out")]
#[tracing::instrument(skip(db, body))]
pub async fn delete_opt_out(
    db: Data<dyn Database>,
    actor: Actor,
    body: Json<DeleteOptOutBody>,
) -> Result<Json<SuccessBody>, Error> {
    manager::remove_opt_out(db.get_ref(), &actor, &body.phone_number, body.scope).await?;

    Ok(Json(SuccessBody {}))
}

#[get("/opt-out/stats")]
#[tracing::instrument(skip(db))]
pub async fn get_opt_out_stats(
    db: Data<dyn Database>,
    _actor: Actor,
) -> Result<Json<OptOutStats>, Error> {
    let stats = manager::opt_out_stats(db.get_ref()).await?;

    Ok(Json(stats))
}

#[get("/opt-out/export")]
#[tracing::instrument(skip(db))]
pub async fn export_opt_outs(db: Data<dyn Database>, _actor: Actor) -> Result<HttpResponse, Error> {
    let csv = manager::export_csv(db.get_ref()).await?;

    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .body(csv))
}
