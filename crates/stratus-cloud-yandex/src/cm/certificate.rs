//! `yandex_cm_certificate`
//!
//! A certificate is either managed (issued by Let's Encrypt after a domain
//! challenge) or self-managed (imported PEM content).

use crate::client::Client;
use crate::transport::{ApiRequest, Service};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use stratus_cloud::{CloudError, Field, FieldType, Resource, ResourceData, Result, Schema};

pub const TYPE_NAME: &str = "yandex_cm_certificate";

const CERTIFICATES: &str = "certificate-manager/v1/certificates";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateModel {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub domains: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed: Option<Managed>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_managed: Option<SelfManaged>,

    #[serde(default)]
    pub deletion_protection: bool,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub cert_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub challenges: Vec<Challenge>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Managed {
    pub challenge_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfManaged {
    pub certificate: String,

    pub private_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

/// Domain validation the requester has to complete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub domain: String,

    #[serde(rename = "type")]
    pub challenge_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteCertificate {
    folder_id: String,
    #[serde(default)]
    created_at: Option<String>,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default, rename = "type")]
    cert_type: Option<String>,
    #[serde(default)]
    domains: Vec<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    not_after: Option<String>,
    #[serde(default)]
    challenges: Vec<RemoteChallenge>,
    #[serde(default)]
    deletion_protection: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteChallenge {
    domain: String,
    #[serde(rename = "type")]
    challenge_type: String,
    #[serde(default)]
    dns_challenge: Option<RemoteDnsChallenge>,
    #[serde(default)]
    http_challenge: Option<RemoteHttpChallenge>,
}

#[derive(Debug, Deserialize)]
struct RemoteDnsChallenge {
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct RemoteHttpChallenge {
    url: String,
    content: String,
}

impl From<RemoteChallenge> for Challenge {
    fn from(remote: RemoteChallenge) -> Self {
        let dns = remote.dns_challenge;
        let http = remote.http_challenge;
        Self {
            domain: remote.domain,
            challenge_type: remote.challenge_type,
            dns_name: dns.as_ref().map(|d| d.name.clone()),
            dns_type: dns.as_ref().map(|d| d.record_type.clone()),
            dns_value: dns.map(|d| d.value),
            http_url: http.as_ref().map(|h| h.url.clone()),
            http_content: http.map(|h| h.content),
        }
    }
}

fn check_source(model: &CertificateModel) -> Result<()> {
    match (&model.managed, &model.self_managed) {
        (Some(_), None) if model.domains.is_empty() => Err(CloudError::invalid_config(
            "a managed certificate needs at least one domain",
        )),
        (Some(_), None) => Ok(()),
        (None, Some(_)) if !model.domains.is_empty() => Err(CloudError::invalid_config(
            "domains of a self-managed certificate come from its content",
        )),
        (None, Some(_)) => Ok(()),
        _ => Err(CloudError::invalid_config(
            "exactly one of managed or self_managed must be set",
        )),
    }
}

fn expand_create(model: &CertificateModel, folder_id: &str) -> Result<(String, Value)> {
    check_source(model)?;
    let mut body = json!({
        "folderId": folder_id,
        "name": model.name,
        "description": model.description.clone().unwrap_or_default(),
        "labels": model.labels,
        "deletionProtection": model.deletion_protection,
    });

    if let Some(managed) = &model.managed {
        body["domains"] = json!(model.domains);
        body["challengeType"] = json!(managed.challenge_type);
        return Ok((format!("{CERTIFICATES}:requestNew"), body));
    }
    if let Some(content) = &model.self_managed {
        body["certificate"] = json!(content.certificate);
        body["privateKey"] = json!(content.private_key);
        if let Some(chain) = &content.chain {
            body["chain"] = json!(chain);
        }
    }
    Ok((CERTIFICATES.to_string(), body))
}

fn expand_update(model: &CertificateModel, changed: &[&str]) -> Value {
    let mut mask = Vec::new();
    let mut body = json!({});
    for field in changed {
        match *field {
            "name" => {
                mask.push("name");
                body["name"] = json!(model.name);
            }
            "description" => {
                mask.push("description");
                body["description"] = json!(model.description.clone().unwrap_or_default());
            }
            "labels" => {
                mask.push("labels");
                body["labels"] = json!(model.labels);
            }
            "deletion_protection" => {
                mask.push("deletionProtection");
                body["deletionProtection"] = json!(model.deletion_protection);
            }
            "self_managed" => {
                if let Some(content) = &model.self_managed {
                    mask.extend(["certificate", "chain", "privateKey"]);
                    body["certificate"] = json!(content.certificate);
                    body["chain"] = json!(content.chain.clone().unwrap_or_default());
                    body["privateKey"] = json!(content.private_key);
                }
            }
            _ => {}
        }
    }
    body["updateMask"] = json!(mask.join(","));
    body
}

async fn refresh(client: &Client, data: &mut ResourceData, timeout: Duration) -> Result<()> {
    let id = data.require_id()?.to_string();
    let known: Option<CertificateModel> = data.decode().ok();
    let remote: RemoteCertificate = client
        .call(
            ApiRequest::get(Service::CertificateManager, format!("{CERTIFICATES}/{id}")),
            timeout,
        )
        .await?;

    let managed = known.as_ref().and_then(|k| k.managed.clone());
    let model = CertificateModel {
        name: remote.name,
        folder_id: Some(remote.folder_id),
        description: Some(remote.description).filter(|d| !d.is_empty()),
        labels: remote.labels,
        // Self-managed domains are derived from the content and never configured.
        domains: if managed.is_some() { remote.domains } else { Vec::new() },
        managed,
        self_managed: known.and_then(|k| k.self_managed),
        deletion_protection: remote.deletion_protection,
        cert_type: remote.cert_type,
        status: remote.status,
        issuer: remote.issuer,
        subject: remote.subject,
        not_after: remote.not_after,
        challenges: remote.challenges.into_iter().map(Challenge::from).collect(),
        created_at: remote.created_at,
    };
    data.flatten(&model)
}

pub struct Certificate;

#[async_trait]
impl Resource<Client> for Certificate {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        let challenge = vec![
            Field::string("domain"),
            Field::string("type"),
            Field::string("dns_name"),
            Field::string("dns_type"),
            Field::string("dns_value"),
            Field::string("http_url"),
            Field::string("http_content"),
        ];

        Schema::new(vec![
            Field::string("name").required().non_empty(),
            Field::string("folder_id").optional_computed().force_new(),
            Field::string("description"),
            Field::labels(),
            Field::set("domains", FieldType::String).force_new(),
            Field::object(
                "managed",
                vec![Field::string("challenge_type")
                    .required()
                    .one_of(&["DNS_CNAME", "DNS_TXT", "HTTP"])],
            )
            .force_new()
            .conflicts_with(&["self_managed"]),
            Field::object(
                "self_managed",
                vec![
                    Field::string("certificate").required().non_empty(),
                    Field::string("private_key").required().sensitive().non_empty(),
                    Field::string("chain"),
                ],
            )
            .conflicts_with(&["managed"]),
            Field::bool("deletion_protection").default(json!(false)),
            Field::string("type").computed(),
            Field::string("status").computed(),
            Field::string("issuer").computed(),
            Field::string("subject").computed(),
            Field::string("not_after").computed(),
            Field::blocks("challenges", challenge).computed(),
            Field::string("created_at").computed(),
        ])
    }

    async fn create(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let model: CertificateModel = data.decode()?;
        let folder_id = client.config().folder_id_or(model.folder_id.as_deref())?;
        let (path, body) = expand_create(&model, &folder_id)?;

        let op = client
            .call_operation(
                ApiRequest::post(Service::CertificateManager, path, body),
                data.timeouts().create,
            )
            .await?;
        data.set_id(op.require_metadata("certificateId")?);

        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn read(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn update(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let id = data.require_id()?.to_string();
        let model: CertificateModel = data.decode()?;

        let changed = data.changed_fields(&[
            "name",
            "description",
            "labels",
            "deletion_protection",
            "self_managed",
        ]);
        if !changed.is_empty() {
            client
                .call_operation(
                    ApiRequest::patch(
                        Service::CertificateManager,
                        format!("{CERTIFICATES}/{id}"),
                        expand_update(&model, &changed),
                    ),
                    data.timeouts().update,
                )
                .await?;
        }

        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn delete(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let id = data.require_id()?.to_string();
        client
            .call_operation(
                ApiRequest::delete(Service::CertificateManager, format!("{CERTIFICATES}/{id}")),
                data.timeouts().delete,
            )
            .await?;
        Ok(())
    }
}
