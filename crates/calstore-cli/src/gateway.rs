//! One-shot JSON command boundary.
//!
//! A request is a single JSON object tagged by `"command"`. It runs in one
//! transaction, committed on success and rolled back on failure. The
//! response is `{"result": ...}` or `{"error": {"message", "trace"}}`.

use anyhow::Context;
use calstore_datastore::{Calendar, CalendarObject, Home, Store, Transaction};
use calstore_types::{ObjectMetadata, PropertyKey, PropertyMap, PropertyName, PropertyValue, ResourceId, SharedCollectionRecord};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error};

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum GatewayCommand {
    ListHomes,
    GetHome {
        uid: String,
        #[serde(default)]
        create: bool,
    },
    RemoveHome {
        uid: String,
    },
    ListCalendars {
        uid: String,
    },
    CreateCalendar {
        uid: String,
        name: String,
    },
    RemoveCalendar {
        uid: String,
        name: String,
    },
    ListObjects {
        uid: String,
        calendar: String,
    },
    GetObject {
        uid: String,
        calendar: String,
        name: String,
    },
    PutObject {
        uid: String,
        calendar: String,
        name: String,
        component: String,
        #[serde(default)]
        metadata: ObjectMetadata,
    },
    RemoveObject {
        uid: String,
        calendar: String,
        name: String,
    },
    GetProperties {
        uid: String,
        calendar: Option<String>,
    },
    SetProperty {
        uid: String,
        calendar: Option<String>,
        /// Clark notation, `{namespace}name`.
        name: String,
        value: String,
        viewer: Option<String>,
    },
    ListShares {
        uid: String,
    },
    AddShare {
        uid: String,
        record: SharedCollectionRecord,
    },
    RemoveShare {
        uid: String,
        share_uid: String,
    },
    ListNotifications {
        uid: String,
    },
}

/// Parse `input`, run it and render the response document.
pub async fn respond(store: &Store, input: &str) -> Value {
    let outcome = match serde_json::from_str::<GatewayCommand>(input) {
        Ok(command) => execute(store, command).await,
        Err(err) => Err(anyhow::Error::new(err).context("malformed gateway command")),
    };
    render(outcome)
}

pub fn render(outcome: anyhow::Result<Value>) -> Value {
    match outcome {
        Ok(result) => json!({ "result": result }),
        Err(err) => {
            error!(error = %err, "gateway command failed");
            json!({
                "error": {
                    "message": err.to_string(),
                    "trace": format!("{err:?}"),
                }
            })
        }
    }
}

pub async fn execute(store: &Store, command: GatewayCommand) -> anyhow::Result<Value> {
    debug!(?command, "gateway command");
    let mut txn = store.new_transaction().await?;
    match run(&mut txn, command).await {
        Ok(result) => {
            txn.commit()?;
            Ok(result)
        }
        Err(err) => {
            txn.abort();
            Err(err)
        }
    }
}

async fn run(txn: &mut Transaction, command: GatewayCommand) -> anyhow::Result<Value> {
    match command {
        GatewayCommand::ListHomes => Ok(json!(txn.home_uids()?)),
        GatewayCommand::GetHome { uid, create } => {
            let home = txn.home_with_uid(&uid, create).await?;
            Ok(match home {
                Some(home) => json!({
                    "uid": home.uid(),
                    "resource_id": home.resource_id().get(),
                    "created": home.created()?,
                    "calendars": home.calendar_names(txn)?,
                }),
                None => Value::Null,
            })
        }
        GatewayCommand::RemoveHome { uid } => {
            txn.remove_home(&uid).await?;
            Ok(Value::Null)
        }
        GatewayCommand::ListCalendars { uid } => Ok(json!(home(txn, &uid)?.calendar_names(txn)?)),
        GatewayCommand::CreateCalendar { uid, name } => {
            let home = home(txn, &uid)?;
            let calendar = home.create_calendar_with_name(txn, &name).await?;
            Ok(json!({ "name": calendar.name(), "resource_id": calendar.resource_id().get() }))
        }
        GatewayCommand::RemoveCalendar { uid, name } => {
            home(txn, &uid)?.remove_calendar_with_name(txn, &name).await?;
            Ok(Value::Null)
        }
        GatewayCommand::ListObjects { uid, calendar } => {
            Ok(json!(calendar_of(txn, &uid, &calendar)?.object_names(txn)?))
        }
        GatewayCommand::GetObject { uid, calendar, name } => {
            let calendar = calendar_of(txn, &uid, &calendar)?;
            let object = calendar
                .calendar_object_with_name(txn, &name)?
                .with_context(|| format!("no object {name} in {}", calendar.name()))?;
            object_json(txn, &object)
        }
        GatewayCommand::PutObject {
            uid,
            calendar,
            name,
            component,
            metadata,
        } => {
            let calendar = calendar_of(txn, &uid, &calendar)?;
            let object = match calendar.calendar_object_with_name(txn, &name)? {
                Some(existing) => existing.set_component(txn, &component, metadata).await?,
                None => {
                    calendar
                        .create_calendar_object_with_name(txn, &name, &component, metadata)
                        .await?
                }
            };
            object_json(txn, &object)
        }
        GatewayCommand::RemoveObject { uid, calendar, name } => {
            calendar_of(txn, &uid, &calendar)?
                .remove_calendar_object_with_name(txn, &name)
                .await?;
            Ok(Value::Null)
        }
        GatewayCommand::GetProperties { uid, calendar } => {
            let id = target(txn, &uid, calendar.as_deref())?;
            Ok(properties_json(&txn.properties(id)?))
        }
        GatewayCommand::SetProperty {
            uid,
            calendar,
            name,
            value,
            viewer,
        } => {
            let id = target(txn, &uid, calendar.as_deref())?;
            let name = PropertyName::parse(&name)?;
            let key = match viewer {
                Some(viewer) => PropertyKey::for_viewer(name, viewer),
                None => PropertyKey::global(name),
            };
            txn.set_property(id, key, PropertyValue::new(value)).await?;
            Ok(Value::Null)
        }
        GatewayCommand::ListShares { uid } => {
            let records = home(txn, &uid)?.sharing_registry().records(txn)?;
            Ok(serde_json::to_value(records)?)
        }
        GatewayCommand::AddShare { uid, record } => {
            home(txn, &uid)?.sharing_registry().add_or_update(txn, record).await?;
            Ok(Value::Null)
        }
        GatewayCommand::RemoveShare { uid, share_uid } => {
            home(txn, &uid)?.sharing_registry().remove(txn, &share_uid).await?;
            Ok(Value::Null)
        }
        GatewayCommand::ListNotifications { uid } => {
            let names: Vec<Value> = match txn.notifications_with_uid(&uid, false).await? {
                Some(collection) => collection
                    .notifications(txn)?
                    .iter()
                    .map(|n| json!({ "name": n.name(), "type": n.xml_type() }))
                    .collect(),
                None => Vec::new(),
            };
            Ok(Value::Array(names))
        }
    }
}

fn home(txn: &Transaction, uid: &str) -> anyhow::Result<Home> {
    txn.home(uid)?.with_context(|| format!("no calendar home for {uid}"))
}

fn calendar_of(txn: &Transaction, uid: &str, name: &str) -> anyhow::Result<Calendar> {
    home(txn, uid)?
        .calendar_with_name(txn, name)?
        .with_context(|| format!("no calendar {name} in {uid}"))
}

/// The home itself, or one of its calendars.
fn target(txn: &Transaction, uid: &str, calendar: Option<&str>) -> anyhow::Result<ResourceId> {
    Ok(match calendar {
        Some(name) => calendar_of(txn, uid, name)?.resource_id(),
        None => home(txn, uid)?.resource_id(),
    })
}

fn object_json(txn: &Transaction, object: &CalendarObject) -> anyhow::Result<Value> {
    Ok(json!({
        "name": object.name(),
        "uid": object.uid(),
        "type": object.component_type().as_str(),
        "component": object.component(),
        "metadata": object.metadata(),
        "dropbox_id": object.dropbox_id(),
        "properties": properties_json(&object.properties(txn)?),
    }))
}

/// Clark-notation keys; viewer rows are suffixed with `#<viewer>`.
fn properties_json(properties: &PropertyMap) -> Value {
    let map: Map<String, Value> = properties
        .iter()
        .map(|(key, value)| {
            let name = match &key.viewer {
                Some(viewer) => format!("{}#{viewer}", key.name.to_clark()),
                None => key.name.to_clark(),
            };
            (name, Value::String(value.as_str().to_string()))
        })
        .collect();
    Value::Object(map)
}
