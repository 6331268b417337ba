//! Cloud DLP v2 adapter: inspect, then de-identify, with named templates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ApiError, GcpClient, PiiRedactor};
use crate::domain::{Finding, RedactionResult, RedactionTemplates};
use crate::error::{PipelineError, Result};

const DLP_API: &str = "https://dlp.googleapis.com/v2";

/// DLP client
pub struct DlpRedactor {
    client: GcpClient,
    endpoint: String,
}

impl DlpRedactor {
    pub fn new(client: GcpClient) -> Self {
        Self::with_endpoint(client, DLP_API)
    }

    /// `endpoint` is the versioned API root, e.g. `https://dlp.googleapis.com/v2`
    pub fn with_endpoint(client: GcpClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn content_url(&self, templates: &RedactionTemplates, method: &str) -> String {
        format!(
            "{}/{}/content:{}",
            self.endpoint,
            template_parent(&templates.inspect),
            method
        )
    }

    async fn inspect(&self, text: &str, templates: &RedactionTemplates) -> Result<Vec<Finding>> {
        let request = InspectRequest {
            inspect_template_name: &templates.inspect,
            item: ContentItem { value: text },
        };

        let response: InspectResponse = self
            .client
            .post(&self.content_url(templates, "inspect"), &[], &request)
            .await
            .map_err(|e| redaction_error("inspect", e))?;

        Ok(response.into_findings())
    }

    async fn deidentify(&self, text: &str, templates: &RedactionTemplates) -> Result<String> {
        let request = DeidentifyRequest {
            inspect_template_name: &templates.inspect,
            deidentify_template_name: &templates.deidentify,
            item: ContentItem { value: text },
        };

        let response: DeidentifyResponse = self
            .client
            .post(&self.content_url(templates, "deidentify"), &[], &request)
            .await
            .map_err(|e| redaction_error("deidentify", e))?;

        Ok(response.item.value)
    }
}

fn redaction_error(call: &str, err: ApiError) -> PipelineError {
    PipelineError::redaction(format!("{}: {}", call, err))
}

/// `projects/p/locations/l/inspectTemplates/x` → `projects/p/locations/l`
fn template_parent(template: &str) -> &str {
    ["/inspectTemplates/", "/deidentifyTemplates/"]
        .iter()
        .find_map(|marker| template.find(marker).map(|pos| &template[..pos]))
        .unwrap_or(template)
}

#[async_trait]
impl PiiRedactor for DlpRedactor {
    async fn redact(&self, text: &str, templates: &RedactionTemplates) -> Result<RedactionResult> {
        if text.trim().is_empty() {
            return Ok(RedactionResult::unchanged(text));
        }

        let findings = self.inspect(text, templates).await?;
        let redacted = self.deidentify(text, templates).await?;
        let result = RedactionResult::new(text, redacted, findings);

        debug!(
            findings = result.findings.len(),
            info_types = ?result.info_types,
            applied = result.applied,
            "Redaction finished"
        );
        Ok(result)
    }

    async fn check_templates(&self, templates: &RedactionTemplates) -> Result<()> {
        for template in [&templates.inspect, &templates.deidentify] {
            let url = format!("{}/{}", self.endpoint, template);
            let _: serde_json::Value = self.client.get(&url, &[]).await.map_err(|e| {
                if e.is_not_found() {
                    PipelineError::configuration(format!("DLP template {} not found", template))
                } else {
                    redaction_error(template, e)
                }
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ContentItem<'a> {
    value: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InspectRequest<'a> {
    inspect_template_name: &'a str,
    item: ContentItem<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeidentifyRequest<'a> {
    inspect_template_name: &'a str,
    deidentify_template_name: &'a str,
    item: ContentItem<'a>,
}

#[derive(Debug, Default, Deserialize)]
struct InspectResponse {
    #[serde(default)]
    result: InspectResult,
}

#[derive(Debug, Default, Deserialize)]
struct InspectResult {
    #[serde(default)]
    findings: Vec<RawFinding>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFinding {
    info_type: InfoType,
    #[serde(default)]
    likelihood: Option<String>,
    quote: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfoType {
    name: String,
}

impl InspectResponse {
    fn into_findings(self) -> Vec<Finding> {
        self.result
            .findings
            .into_iter()
            .map(|f| Finding {
                info_type: f.info_type.name,
                likelihood: f
                    .likelihood
                    .unwrap_or_else(|| "LIKELIHOOD_UNSPECIFIED".to_string()),
                quote: f.quote,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct DeidentifyResponse {
    item: ReturnedItem,
}

#[derive(Debug, Deserialize)]
struct ReturnedItem {
    #[serde(default)]
    value: String,
}
