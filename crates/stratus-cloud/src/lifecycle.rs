//! Lifecycle driver
//!
//! Runs a single CRUD call of a [`Resource`]: defaults and validation happen
//! before any remote call, timeouts are resolved from configuration, and a
//! missing remote object is translated into "resource gone" where that is
//! the expected outcome.

use crate::data::ResourceData;
use crate::error::{CloudError, Result};
use crate::resource::Resource;
use crate::timeouts::TIMEOUTS_KEY;
use tracing::Instrument;

fn resolve_timeouts<C, R>(resource: &R, data: &mut ResourceData) -> Result<()>
where
    C: ?Sized + Sync,
    R: Resource<C> + ?Sized,
{
    let timeouts = resource
        .default_timeouts()
        .resolve(data.config().get(TIMEOUTS_KEY))?;
    data.set_timeouts(timeouts);
    Ok(())
}

fn prepare<C, R>(resource: &R, data: &mut ResourceData) -> Result<()>
where
    C: ?Sized + Sync,
    R: Resource<C> + ?Sized,
{
    let schema = resource.schema();
    schema.apply_defaults(data.config_mut());
    schema.validate(data.config())?;
    resolve_timeouts::<C, R>(resource, data)
}

pub async fn create<C, R>(resource: &R, client: &C, data: &mut ResourceData) -> Result<()>
where
    C: ?Sized + Sync,
    R: Resource<C> + ?Sized,
{
    prepare::<C, R>(resource, data)?;

    let span = tracing::info_span!("create", resource = resource.type_name());
    async {
        resource.create(client, data).await?;
        let id = data.id().ok_or_else(|| {
            CloudError::Transport(format!("{} create returned no id", resource.type_name()))
        })?;
        tracing::info!("Created {} {}", resource.type_name(), id);
        Ok::<(), CloudError>(())
    }
    .instrument(span)
    .await
}

/// Refresh state. A remote object that no longer exists marks the resource
/// gone instead of failing.
pub async fn read<C, R>(resource: &R, client: &C, data: &mut ResourceData) -> Result<()>
where
    C: ?Sized + Sync,
    R: Resource<C> + ?Sized,
{
    resolve_timeouts::<C, R>(resource, data)?;
    let id = data.require_id()?.to_string();

    let span = tracing::info_span!("read", resource = resource.type_name(), id = %id);
    async {
        match resource.read(client, data).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                tracing::warn!(
                    "{} {} no longer exists, removing it from state",
                    resource.type_name(),
                    id
                );
                data.mark_gone();
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
    .instrument(span)
    .await
}

/// Apply an in-place update. Changes to replacement-only fields are refused.
pub async fn update<C, R>(resource: &R, client: &C, data: &mut ResourceData) -> Result<()>
where
    C: ?Sized + Sync,
    R: Resource<C> + ?Sized,
{
    prepare::<C, R>(resource, data)?;
    let id = data.require_id()?.to_string();

    // Compare like with like: no provider-set values on either side.
    let schema = resource.schema();
    if let Some(prior) = data.prior_mut() {
        schema.strip_computed(prior);
    }
    if let Some(prior) = data.prior().cloned() {
        schema.carry_over(&prior, data.config_mut());
    }

    let replaced: Vec<&str> = data.changed_fields(&schema.force_new_fields());
    if !replaced.is_empty() {
        return Err(CloudError::invalid_config(format!(
            "{} cannot be changed in place: {}",
            resource.type_name(),
            replaced.join(", ")
        )));
    }

    let span = tracing::info_span!("update", resource = resource.type_name(), id = %id);
    async {
        resource.update(client, data).await?;
        tracing::info!("Updated {} {}", resource.type_name(), id);
        Ok::<(), CloudError>(())
    }
    .instrument(span)
    .await
}

/// Delete the remote object. An object that is already gone counts as
/// deleted.
pub async fn delete<C, R>(resource: &R, client: &C, data: &mut ResourceData) -> Result<()>
where
    C: ?Sized + Sync,
    R: Resource<C> + ?Sized,
{
    resolve_timeouts::<C, R>(resource, data)?;
    let id = data.require_id()?.to_string();

    let span = tracing::info_span!("delete", resource = resource.type_name(), id = %id);
    async {
        match resource.delete(client, data).await {
            Ok(()) => tracing::info!("Deleted {} {}", resource.type_name(), id),
            Err(err) if err.is_not_found() => {
                tracing::debug!("{} {} already deleted", resource.type_name(), id);
            }
            Err(err) => return Err(err),
        }
        data.mark_gone();
        Ok(())
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, Schema};
    use crate::status::StatusCode;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records the calls it receives and fails reads/deletes on demand
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        missing: bool,
    }

    struct Bucket;

    #[async_trait]
    impl Resource<Recorder> for Bucket {
        fn type_name(&self) -> &'static str {
            "test_bucket"
        }

        fn schema(&self) -> Schema {
            Schema::new(vec![
                Field::string("name").required().force_new(),
                Field::string("region").optional_computed().force_new(),
                Field::string("class").default(json!("STANDARD")),
                Field::int("max_size"),
            ])
        }

        async fn create(&self, client: &Recorder, data: &mut ResourceData) -> Result<()> {
            client.calls.lock().unwrap().push("create".into());
            data.set_id("b1");
            Ok(())
        }

        async fn read(&self, client: &Recorder, _data: &mut ResourceData) -> Result<()> {
            client.calls.lock().unwrap().push("read".into());
            if client.missing {
                return Err(CloudError::api(StatusCode::NotFound, "bucket b1 not found"));
            }
            Ok(())
        }

        async fn update(&self, client: &Recorder, _data: &mut ResourceData) -> Result<()> {
            client.calls.lock().unwrap().push("update".into());
            Ok(())
        }

        async fn delete(&self, client: &Recorder, _data: &mut ResourceData) -> Result<()> {
            client.calls.lock().unwrap().push("delete".into());
            if client.missing {
                return Err(CloudError::ResourceNotFound("b1".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_create_validates_before_calling() {
        let client = Recorder::default();
        let mut data = ResourceData::planned(json!({ "max_size": "big" })).unwrap();

        let result = create(&Bucket, &client, &mut data).await;

        assert!(matches!(result, Err(CloudError::InvalidConfig(_))));
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_applies_defaults_and_timeouts() {
        let client = Recorder::default();
        let mut data = ResourceData::planned(json!({
            "name": "logs",
            "timeouts": { "create": "3m" }
        }))
        .unwrap();

        create(&Bucket, &client, &mut data).await.unwrap();

        assert_eq!(data.id(), Some("b1"));
        assert_eq!(data.config()["class"], json!("STANDARD"));
        assert_eq!(data.timeouts().create, Duration::from_secs(180));
    }

    #[tokio::test]
    async fn test_read_of_missing_object_marks_gone() {
        let client = Recorder {
            missing: true,
            ..Default::default()
        };
        let mut data = ResourceData::stored("b1", json!({ "name": "logs" })).unwrap();

        read(&Bucket, &client, &mut data).await.unwrap();

        assert!(data.is_gone());
    }

    #[tokio::test]
    async fn test_delete_of_missing_object_succeeds() {
        let client = Recorder {
            missing: true,
            ..Default::default()
        };
        let mut data = ResourceData::stored("b1", json!({ "name": "logs" })).unwrap();

        delete(&Bucket, &client, &mut data).await.unwrap();

        assert!(data.is_gone());
        assert_eq!(*client.calls.lock().unwrap(), vec!["delete".to_string()]);
    }

    #[tokio::test]
    async fn test_update_refuses_force_new_change() {
        let client = Recorder::default();
        let mut data = ResourceData::changed(
            "b1",
            json!({ "name": "logs", "class": "STANDARD" }),
            json!({ "name": "archive" }),
        )
        .unwrap();

        let err = update(&Bucket, &client, &mut data).await.unwrap_err();

        assert!(err.to_string().contains("cannot be changed in place: name"));
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_in_place() {
        let client = Recorder::default();
        let mut data = ResourceData::changed(
            "b1",
            json!({ "name": "logs", "class": "STANDARD", "region": "ru-central1" }),
            json!({ "name": "logs", "max_size": 100 }),
        )
        .unwrap();

        update(&Bucket, &client, &mut data).await.unwrap();

        assert_eq!(*client.calls.lock().unwrap(), vec!["update".to_string()]);
        assert_eq!(data.config()["region"], json!("ru-central1"));
    }
}
