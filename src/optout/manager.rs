use chrono::Utc;
use serde::Serialize;

use crate::actor::Actor;
use crate::database::Database;
use crate::error::Error;
use crate::voter::VoterId;

use super::{normalize_phone, OptOutId, OptOutMethod, OptOutRecord, OptOutScope};

#[derive(Clone, Debug)]
pub struct NewOptOut {
    pub phone_number: String,
    pub scope: OptOutScope,
    pub method: OptOutMethod,
    pub reason: Option<String>,
    pub voter_id: Option<VoterId>,
}

#[tracing::instrument(skip(db))]
pub async fn create_opt_out(db: &dyn Database, new: NewOptOut) -> Result<OptOutRecord, Error> {
    let phone_number = normalize_phone(&new.phone_number)?;

    if let Some(existing) = db
        .opt_outs()
        .fetch_opt_out(&phone_number, new.scope)
        .await?
    {
        return Err(Error::OptOutAlreadyExists {
            phone_number: existing.phone_number,
            scope: existing.scope,
        });
    }

    let opt_out = OptOutRecord {
        id: OptOutId::new(),
        phone_number,
        scope: new.scope,
        method: new.method,
        opted_out_at: Utc::now(),
        reason: new.reason,
        voter_id: new.voter_id,
    };

    db.opt_outs().insert_opt_out(&opt_out).await?;

    Ok(opt_out)
}

#[tracing::instrument(skip(db))]
pub async fn get_opt_outs(db: &dyn Database) -> Result<Vec<OptOutRecord>, Error> {
    let opt_outs = db.opt_outs().fetch_opt_outs().await?;

    Ok(opt_outs)
}

/// Administrative removal only; the engine itself never deletes
/// suppression entries.
#[tracing::instrument(skip(db))]
pub async fn remove_opt_out(
    db: &dyn Database,
    actor: &Actor,
    phone_number: &str,
    scope: OptOutScope,
) -> Result<(), Error> {
    actor.require_super_admin("remove-opt-out")?;
    let phone_number = normalize_phone(phone_number)?;

    let removed = db.opt_outs().delete_opt_out(&phone_number, scope).await?;
    if !removed {
        return Err(Error::OptOutNotFound {
            phone_number,
            scope,
        });
    }

    Ok(())
}

#[derive(Clone, Debug, Serialize)]
pub struct OptOutStats {
    pub total: usize,
    pub by_scope: ScopeCounts,
    pub by_method: MethodCounts,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScopeCounts {
    pub all: usize,
    pub robo_calls: usize,
    pub sms: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct MethodCounts {
    pub phone: usize,
    pub sms: usize,
    pub manual: usize,
    pub web: usize,
}

#[tracing::instrument(skip(db))]
pub async fn opt_out_stats(db: &dyn Database) -> Result<OptOutStats, Error> {
    let opt_outs = db.opt_outs().fetch_opt_outs().await?;

    let mut stats = OptOutStats {
        total: opt_outs.len(),
        by_scope: ScopeCounts {
            all: 0,
            robo_calls: 0,
            sms: 0,
        },
        by_method: MethodCounts {
            phone: 0,
            sms: 0,
            manual: 0,
            web: 0,
        },
    };

    for opt_out in &opt_outs {
        match opt_out.scope {
            OptOutScope::All => stats.by_scope.all += 1,
            OptOutScope::RoboCalls => stats.by_scope.robo_calls += 1,
            OptOutScope::Sms => stats.by_scope.sms += 1,
        }
        match opt_out.method {
            OptOutMethod::Phone => stats.by_method.phone += 1,
            OptOutMethod::Sms => stats.by_method.sms += 1,
            OptOutMethod::Manual => stats.by_method.manual += 1,
            OptOutMethod::Web => stats.by_method.web += 1,
        }
    }

    Ok(stats)
}

#[tracing::instrument(skip(db))]
pub async fn export_csv(db: &dyn Database) -> Result<String, Error> {
    let opt_outs = db.opt_outs().fetch_opt_outs().await?;

    let mut csv = String::from("phone_number,scope,method,opted_out_at,reason\n");
    for opt_out in opt_outs {
        csv.push_str(&format!(
            "{},{},{},{},{}\n",
            opt_out.phone_number,
            opt_out.scope.as_str(),
            opt_out.method.as_str(),
            opt_out.opted_out_at.to_rfc3339(),
            csv_field(opt_out.reason.as_deref().unwrap_or_default()),
        ));
    }

    Ok(csv)
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use crate::actor::{ActorId, Role};
    use crate::database::test::MemoryDatabase;

    use super::*;

    fn super_admin() -> Actor {
        Actor {
            id: ActorId::new(),
            role: Role::SuperAdmin,
        }
    }

    fn new_opt_out(phone: &str, scope: OptOutScope) -> NewOptOut {
        NewOptOut {
            phone_number: phone.to_string(),
            scope,
            method: OptOutMethod::Web,
            reason: None,
            voter_id: None,
        }
    }

    #[tokio::test]
    async fn create_normalizes_the_phone_number() {
        let db = MemoryDatabase::new();

        let record = create_opt_out(&db, new_opt_out("(205) 555-0134", OptOutScope::All))
            .await
            .unwrap();

        assert_eq!(record.phone_number, "+12055550134");
    }

    #[tokio::test]
    async fn create_rejects_a_second_active_record_for_the_same_pair() {
        let db = MemoryDatabase::new();
        create_opt_out(&db, new_opt_out("2055550134", OptOutScope::Sms))
            .await
            .unwrap();

        // identical pair in a different format collides
        let result = create_opt_out(&db, new_opt_out("(205) 555-0134", OptOutScope::Sms)).await;
        assert_eq!(
            result.unwrap_err(),
            Error::OptOutAlreadyExists {
                phone_number: "+12055550134".to_string(),
                scope: OptOutScope::Sms,
            }
        );

        // a different scope for the same number is a separate record
        create_opt_out(&db, new_opt_out("2055550134", OptOutScope::All))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn remove_requires_super_admin() {
        let db = MemoryDatabase::new();
        let admin = Actor {
            id: ActorId::new(),
            role: Role::Admin,
        };

        let result = remove_opt_out(&db, &admin, "2055550134", OptOutScope::All).await;

        assert_eq!(
            result.unwrap_err(),
            Error::NotAuthorized {
                action: "remove-opt-out"
            }
        );
    }

    #[tokio::test]
    async fn remove_reports_missing_records() {
        let db = MemoryDatabase::new();

        let result = remove_opt_out(&db, &super_admin(), "2055550134", OptOutScope::All).await;

        assert_eq!(
            result.unwrap_err(),
            Error::OptOutNotFound {
                phone_number: "+12055550134".to_string(),
                scope: OptOutScope::All,
            }
        );
    }

    #[tokio::test]
    async fn stats_fold_scope_and_method() {
        let db = MemoryDatabase::new();
        create_opt_out(&db, new_opt_out("2055550001", OptOutScope::All))
            .await
            .unwrap();
        create_opt_out(&db, new_opt_out("2055550002", OptOutScope::Sms))
            .await
            .unwrap();
        let mut by_phone = new_opt_out("2055550003", OptOutScope::RoboCalls);
        by_phone.method = OptOutMethod::Phone;
        create_opt_out(&db, by_phone).await.unwrap();

        let stats = opt_out_stats(&db).await.unwrap();

        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_scope.all, 1);
        assert_eq!(stats.by_scope.sms, 1);
        assert_eq!(stats.by_scope.robo_calls, 1);
        assert_eq!(stats.by_method.web, 2);
        assert_eq!(stats.by_method.phone, 1);
    }

    #[tokio::test]
    async fn export_quotes_awkward_reasons() {
        let db = MemoryDatabase::new();
        let mut with_reason = new_opt_out("2055550001", OptOutScope::All);
        with_reason.reason = Some("asked to stop, twice".to_string());
        create_opt_out(&db, with_reason).await.unwrap();

        let csv = export_csv(&db).await.unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "phone_number,scope,method,opted_out_at,reason");
        assert!(lines[1].starts_with("+12055550001,ALL,WEB,"));
        assert!(lines[1].ends_with("\"asked to stop, twice\""));
    }
}
