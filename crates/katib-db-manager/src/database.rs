//! Connection details of the MySQL database behind the manager.
//!
//! Two relations can provide them: the deprecated `mysql` relation, where the
//! database unit shares root credentials in its unit bag, and `relational-db`,
//! where the database application answers our `database` request in its
//! application bag.

use std::sync::Arc;

use async_trait::async_trait;
use charm_core::check;
use charm_core::component::Component;
use charm_core::event::HookEvent;
use charm_core::model::BagOwner;
use charm_core::model::CharmModel;
use charm_core::model::DataBag;
use charm_core::model::Relation;
use charm_core::CharmError;
use charm_core::CharmResult;
use charm_core::Check;
use charm_core::Status;
use error_stack::ResultExt;
use tracing::debug;
use tracing::warn;

pub const MYSQL_RELATION: &str = "mysql";
pub const RELATIONAL_DB_RELATION: &str = "relational-db";

/// Database requested over `relational-db`.
pub const DATABASE_NAME: &str = "katib";

const BOTH_RELATIONS: &str = "Cannot have both 'mysql' and 'relational-db' relations. Please remove the deprecated 'mysql' relation.";
const NO_RELATION: &str = "Please add required database relation: eg. relational-db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: String,
    pub database: String,
}

fn incomplete(relation_name: &str) -> Status {
    Status::waiting(format!(
        "Incorrect/incomplete data found in relation {relation_name}. See logs"
    ))
}

fn model_failed(relation_name: &str) -> CharmError {
    CharmError::Model {
        message: format!("failed to access relation {relation_name}"),
    }
}

fn required<'a>(bag: &'a DataBag, key: &str) -> Option<&'a str> {
    bag.get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

pub struct DatabaseRequirer {
    model: Arc<dyn CharmModel>,
}

impl DatabaseRequirer {
    pub fn new(model: Arc<dyn CharmModel>) -> Self {
        Self { model }
    }

    fn relations(&self, relation_name: &str) -> CharmResult<Vec<Relation>> {
        self.model
            .relations(relation_name)
            .change_context_lazy(|| model_failed(relation_name))
    }

    fn bag(&self, relation: &Relation, owner: &BagOwner) -> CharmResult<DataBag> {
        self.model
            .relation_data(relation, owner)
            .change_context_lazy(|| model_failed(&relation.name))
    }

    pub fn database_info(&self) -> CharmResult<Check<DatabaseInfo>> {
        let mysql = self.relations(MYSQL_RELATION)?;
        let relational_db = self.relations(RELATIONAL_DB_RELATION)?;

        match (mysql.first(), relational_db.first()) {
            (Some(_), Some(_)) => Ok(Check::Fail(Status::blocked(BOTH_RELATIONS))),
            (Some(relation), None) => self.mysql_info(relation),
            (None, Some(relation)) => self.relational_db_info(relation),
            (None, None) => Ok(Check::Fail(Status::blocked(NO_RELATION))),
        }
    }

    fn mysql_info(&self, relation: &Relation) -> CharmResult<Check<DatabaseInfo>> {
        let Some(unit) = relation.remote_units.first() else {
            return Ok(Check::Fail(Status::waiting("Waiting for mysql data")));
        };
        let bag = self.bag(relation, &BagOwner::RemoteUnit(unit.clone()))?;
        if bag.is_empty() {
            return Ok(Check::Fail(Status::waiting("Waiting for mysql data")));
        }

        let info = (|| {
            Some(DatabaseInfo {
                user: "root".to_string(),
                password: required(&bag, "root_password")?.to_string(),
                host: required(&bag, "host")?.to_string(),
                port: required(&bag, "port")?.to_string(),
                database: required(&bag, "database")?.to_string(),
            })
        })();
        match info {
            Some(info) => Ok(Check::Pass(info)),
            None => {
                warn!(relation = %relation.id, keys = ?bag.keys().collect::<Vec<_>>(), "mysql data incomplete");
                Ok(Check::Fail(incomplete(MYSQL_RELATION)))
            }
        }
    }

    fn relational_db_info(&self, relation: &Relation) -> CharmResult<Check<DatabaseInfo>> {
        let bag = match relation.remote_app {
            Some(_) => self.bag(relation, &BagOwner::RemoteApp)?,
            None => DataBag::new(),
        };
        if bag.is_empty() {
            return Ok(Check::Fail(Status::waiting("Waiting for relational-db data")));
        }

        let info = (|| {
            // `endpoints` is a comma separated list of `host:port`.
            let endpoint = required(&bag, "endpoints")?.split(',').next()?;
            let (host, port) = endpoint.trim().rsplit_once(':')?;
            Some(DatabaseInfo {
                user: required(&bag, "username")?.to_string(),
                password: required(&bag, "password")?.to_string(),
                host: host.to_string(),
                port: port.to_string(),
                database: DATABASE_NAME.to_string(),
            })
        })();
        match info {
            Some(info) => Ok(Check::Pass(info)),
            None => {
                warn!(relation = %relation.id, keys = ?bag.keys().collect::<Vec<_>>(), "relational-db data incomplete");
                Ok(Check::Fail(incomplete(RELATIONAL_DB_RELATION)))
            }
        }
    }

    /// Asks every `relational-db` provider for the `katib` database.
    fn request_database(&self) -> CharmResult<()> {
        let request = DataBag::from([("database".to_string(), DATABASE_NAME.to_string())]);
        for relation in self.relations(RELATIONAL_DB_RELATION)? {
            self.model
                .set_app_data(&relation, &request)
                .change_context_lazy(|| model_failed(RELATIONAL_DB_RELATION))?;
            debug!(relation = %relation.id, "requested database");
        }
        Ok(())
    }
}

#[async_trait]
impl Component for DatabaseRequirer {
    async fn status(&self) -> CharmResult<Status> {
        check!(self.database_info());
        Ok(Status::Active)
    }

    async fn reconcile(&self, _event: &HookEvent) -> CharmResult<Check<()>> {
        self.request_database()?;
        Ok(self.database_info()?.map(|_| ()))
    }
}
