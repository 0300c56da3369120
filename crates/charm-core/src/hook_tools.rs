//! [`CharmModel`] backed by the runtime's hook tools.
//!
//! Every call shells out to one of the hook tool executables the runtime puts
//! on `PATH` while a hook runs (`is-leader`, `config-get`, `relation-get`, ...).
//! JSON output is requested wherever the tool supports it.

use std::env;
use std::io::Write;
use std::process::Command;
use std::process::Stdio;

use error_stack::Report;
use error_stack::ResultExt;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::model::BagOwner;
use crate::model::CharmModel;
use crate::model::DataBag;
use crate::model::ModelError;
use crate::model::Relation;
use crate::status::UnitStatus;

const UNIT_NAME_ENV: &str = "JUJU_UNIT_NAME";
const MODEL_NAME_ENV: &str = "JUJU_MODEL_NAME";
const HOOK_NAME_ENV: &str = "JUJU_HOOK_NAME";
const RELATION_ID_ENV: &str = "JUJU_RELATION_ID";

pub struct HookTools {
    app_name: String,
    unit_name: String,
    model_name: String,
    /// Relation being torn down by the current `*-relation-broken` hook.
    broken_relation_id: Option<String>,
}

impl HookTools {
    pub fn from_env() -> Result<Self, Report<ModelError>> {
        let unit_name = required_env(UNIT_NAME_ENV)?;
        let model_name = required_env(MODEL_NAME_ENV)?;
        let app_name = unit_name
            .split('/')
            .next()
            .unwrap_or(unit_name.as_str())
            .to_string();

        let broken_relation_id = env::var(HOOK_NAME_ENV)
            .ok()
            .filter(|hook| hook.ends_with("-relation-broken"))
            .and_then(|_| env::var(RELATION_ID_ENV).ok());

        Ok(Self {
            app_name,
            unit_name,
            model_name,
            broken_relation_id,
        })
    }

    fn run(&self, tool: &str, args: &[&str]) -> Result<String, Report<ModelError>> {
        debug!(tool, ?args, "running hook tool");
        let output = Command::new(tool)
            .args(args)
            .output()
            .change_context_lazy(|| ModelError::HookTool {
                tool: tool.to_string(),
                message: "failed to execute".to_string(),
            })?;

        if !output.status.success() {
            return Err(Report::new(ModelError::HookTool {
                tool: tool.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_json<T: DeserializeOwned>(
        &self,
        tool: &str,
        args: &[&str],
    ) -> Result<T, Report<ModelError>> {
        let stdout = self.run(tool, args)?;
        // Tools print nothing at all for empty results.
        let stdout = if stdout.trim().is_empty() {
            "null"
        } else {
            stdout.as_str()
        };
        serde_json::from_str(stdout).change_context_lazy(|| ModelError::Output {
            tool: tool.to_string(),
            message: format!("not valid JSON: {}", stdout.trim()),
        })
    }

    fn run_with_stdin(
        &self,
        tool: &str,
        args: &[&str],
        input: &str,
    ) -> Result<(), Report<ModelError>> {
        let mut child = Command::new(tool)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .change_context_lazy(|| ModelError::HookTool {
                tool: tool.to_string(),
                message: "failed to execute".to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .change_context_lazy(|| ModelError::HookTool {
                    tool: tool.to_string(),
                    message: "failed to write stdin".to_string(),
                })?;
        }

        let output = child
            .wait_with_output()
            .change_context_lazy(|| ModelError::HookTool {
                tool: tool.to_string(),
                message: "failed to wait for completion".to_string(),
            })?;

        if !output.status.success() {
            return Err(Report::new(ModelError::HookTool {
                tool: tool.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }));
        }
        Ok(())
    }

    fn remote_app(&self, relation_id: &str, units: &[String]) -> Option<String> {
        if let Some(unit) = units.first() {
            return unit.split('/').next().map(str::to_string);
        }
        // No units yet (relation-created); ask for the application directly.
        self.run_json::<Option<String>>(
            "relation-list",
            &["-r", relation_id, "--app", "--format=json"],
        )
        .ok()
        .flatten()
        .filter(|app| !app.is_empty())
    }
}

impl CharmModel for HookTools {
    fn app_name(&self) -> &str {
        &self.app_name
    }

    fn unit_name(&self) -> &str {
        &self.unit_name
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_leader(&self) -> Result<bool, Report<ModelError>> {
        self.run_json("is-leader", &["--format=json"])
    }

    fn config(&self) -> Result<serde_json::Value, Report<ModelError>> {
        self.run_json("config-get", &["--format=json"])
    }

    fn relations(&self, relation_name: &str) -> Result<Vec<Relation>, Report<ModelError>> {
        let ids: Option<Vec<String>> =
            self.run_json("relation-ids", &[relation_name, "--format=json"])?;

        let mut relations = Vec::new();
        for id in ids.unwrap_or_default() {
            if self.broken_relation_id.as_deref() == Some(id.as_str()) {
                continue;
            }
            let units: Option<Vec<String>> =
                self.run_json("relation-list", &["-r", &id, "--format=json"])?;
            let remote_units = units.unwrap_or_default();
            relations.push(Relation {
                remote_app: self.remote_app(&id, &remote_units),
                id,
                name: relation_name.to_string(),
                remote_units,
            });
        }
        Ok(relations)
    }

    fn relation_data(
        &self,
        relation: &Relation,
        owner: &BagOwner,
    ) -> Result<DataBag, Report<ModelError>> {
        let (app_flag, target) = match owner {
            BagOwner::LocalApp => (true, self.unit_name.clone()),
            BagOwner::RemoteApp => {
                let app = relation.remote_app.clone().ok_or_else(|| {
                    Report::new(ModelError::RelationNotFound {
                        relation_id: relation.id.clone(),
                    })
                    .attach_printable("remote application is not known yet")
                })?;
                (true, app)
            }
            BagOwner::RemoteUnit(unit) => (false, unit.clone()),
        };

        let mut args = vec!["-r", relation.id.as_str(), "--format=json"];
        if app_flag {
            args.push("--app");
        }
        args.push("-");
        args.push(target.as_str());

        let data: Option<DataBag> = self.run_json("relation-get", &args)?;
        Ok(data.unwrap_or_default())
    }

    fn set_app_data(&self, relation: &Relation, data: &DataBag) -> Result<(), Report<ModelError>> {
        let yaml = serde_yaml::to_string(data).change_context_lazy(|| ModelError::Output {
            tool: "relation-set".to_string(),
            message: "failed to encode relation data".to_string(),
        })?;
        self.run_with_stdin(
            "relation-set",
            &["-r", relation.id.as_str(), "--app", "--file", "-"],
            &yaml,
        )
    }

    fn set_unit_data(&self, relation: &Relation, data: &DataBag) -> Result<(), Report<ModelError>> {
        let yaml = serde_yaml::to_string(data).change_context_lazy(|| ModelError::Output {
            tool: "relation-set".to_string(),
            message: "failed to encode relation data".to_string(),
        })?;
        self.run_with_stdin(
            "relation-set",
            &["-r", relation.id.as_str(), "--file", "-"],
            &yaml,
        )
    }

    fn set_unit_status(&self, status: &UnitStatus) -> Result<(), Report<ModelError>> {
        self.run(
            "status-set",
            &[status.status.wire_name(), status.message.as_str()],
        )
        .map(|_| ())
    }
}

fn required_env(name: &str) -> Result<String, Report<ModelError>> {
    env::var(name).change_context_lazy(|| ModelError::MissingEnv {
        name: name.to_string(),
    })
}
