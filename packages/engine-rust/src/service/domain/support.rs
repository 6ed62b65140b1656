//! AWS Support cases over the JSON protocol.

use cloudmock_core::{Fault, FieldKind, Params, Protocol, Shape};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::backend::HandlerContext;
use crate::service::descriptor::{RegistrationError, ServiceDescriptor};
use crate::service::operation::HandlerResult;

pub const SERVICE_ID: &str = "support";

const TARGET_PREFIX: &str = "AWSSupport_20130415";

const SEVERITY_LEVELS: [(&str, &str); 5] = [
    ("low", "Low"),
    ("normal", "Normal"),
    ("high", "High"),
    ("urgent", "Urgent"),
    ("critical", "Critical"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStatus {
    Opened,
    Resolved,
}

impl CaseStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::Opened => "opened",
            CaseStatus::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Case {
    pub case_id: String,
    pub display_id: String,
    pub subject: String,
    pub status: CaseStatus,
    pub service_code: String,
    pub category_code: String,
    pub severity_code: String,
    pub submitted_by: String,
    pub language: String,
    pub cc_email_addresses: Vec<String>,
    pub communication_body: String,
}

impl Case {
    fn to_value(&self) -> Value {
        json!({
            "caseId": self.case_id,
            "displayId": self.display_id,
            "subject": self.subject,
            "status": self.status.as_str(),
            "serviceCode": self.service_code,
            "categoryCode": self.category_code,
            "severityCode": self.severity_code,
            "submittedBy": self.submitted_by,
            "language": self.language,
            "ccEmailAddresses": self.cc_email_addresses,
            "recentCommunications": {
                "communications": [{
                    "caseId": self.case_id,
                    "body": self.communication_body,
                    "submittedBy": self.submitted_by,
                }],
            },
        })
    }
}

/// Support cases of one region, in creation order.
#[derive(Debug, Default)]
pub struct SupportBackend {
    cases: Vec<Case>,
}

impl SupportBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn cases(&self) -> &[Case] {
        &self.cases
    }

    #[must_use]
    pub fn case(&self, case_id: &str) -> Option<&Case> {
        self.cases.iter().find(|c| c.case_id == case_id)
    }

    fn case_mut(&mut self, case_id: &str) -> Result<&mut Case, Fault> {
        self.cases
            .iter_mut()
            .find(|c| c.case_id == case_id)
            .ok_or_else(|| case_not_found(case_id))
    }
}

fn case_not_found(case_id: &str) -> Fault {
    Fault::new(
        "CaseIdNotFound",
        format!("Requested case ID {case_id} does not exist"),
    )
}

fn create_case(
    support: &mut SupportBackend,
    params: &Params,
    ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let subject = params.required_str(Protocol::Json, "subject")?;
    let body = params.required_str(Protocol::Json, "communicationBody")?;
    let severity = params.str("severityCode").unwrap_or("low");
    if !SEVERITY_LEVELS.iter().any(|(code, _)| *code == severity) {
        return Err(Fault::invalid_parameter(
            Protocol::Json,
            "severityCode",
            "is not a known severity level",
        )
        .into());
    }

    let hex = Uuid::new_v4().simple().to_string();
    let case = Case {
        case_id: format!("case-{}-muen-{}", ctx.account_id(), &hex[..16]),
        display_id: (support.cases.len() + 1).to_string(),
        subject: subject.to_string(),
        status: CaseStatus::Opened,
        service_code: params.str("serviceCode").unwrap_or("general-info").to_string(),
        category_code: params.str("categoryCode").unwrap_or("other").to_string(),
        severity_code: severity.to_string(),
        submitted_by: format!("{}@amazonaws.com", ctx.account_id()),
        language: params.str("language").unwrap_or("en").to_string(),
        cc_email_addresses: params.strings("ccEmailAddresses"),
        communication_body: body.to_string(),
    };
    let case_id = case.case_id.clone();
    support.cases.push(case);
    Ok(json!({"caseId": case_id}))
}

fn describe_cases(
    support: &mut SupportBackend,
    params: &Params,
    _ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let wanted = params.strings("caseIdList");
    if let Some(missing) = wanted.iter().find(|id| support.case(id).is_none()) {
        return Err(case_not_found(missing).into());
    }
    let include_resolved = params.bool("includeResolvedCases").unwrap_or(false);
    let display_id = params.str("displayId");

    let cases: Vec<Value> = support
        .cases
        .iter()
        .filter(|c| wanted.is_empty() || wanted.contains(&c.case_id))
        .filter(|c| display_id.is_none_or(|id| c.display_id == id))
        .filter(|c| include_resolved || c.status != CaseStatus::Resolved)
        .map(Case::to_value)
        .collect();
    Ok(json!({"cases": cases}))
}

fn resolve_case(
    support: &mut SupportBackend,
    params: &Params,
    _ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let case_id = params.required_str(Protocol::Json, "caseId")?;
    let case = support.case_mut(case_id)?;
    let initial = case.status;
    case.status = CaseStatus::Resolved;
    Ok(json!({
        "initialCaseStatus": initial.as_str(),
        "finalCaseStatus": case.status.as_str(),
    }))
}

fn describe_severity_levels(
    _support: &mut SupportBackend,
    _params: &Params,
    _ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let levels: Vec<Value> = SEVERITY_LEVELS
        .iter()
        .map(|(code, name)| json!({"code": code, "name": name}))
        .collect();
    Ok(json!({"severityLevels": levels}))
}

/// The `support` Service Descriptor.
///
/// # Errors
///
/// Returns a [`RegistrationError`] if the descriptor is malformed.
pub fn descriptor() -> Result<ServiceDescriptor, RegistrationError> {
    ServiceDescriptor::builder::<SupportBackend>(SERVICE_ID, Protocol::Json)
        .url_base(r"https?://support\.(.+)\.amazonaws\.com")
        .target_prefix(TARGET_PREFIX)
        .backend(|_region| SupportBackend::new())
        .action_with_shape(
            "CreateCase",
            Shape::new()
                .required("subject", FieldKind::String)
                .required("communicationBody", FieldKind::String)
                .optional("serviceCode", FieldKind::String)
                .optional("severityCode", FieldKind::String)
                .optional("categoryCode", FieldKind::String)
                .optional("ccEmailAddresses", FieldKind::List)
                .optional("language", FieldKind::String)
                .optional("issueType", FieldKind::String),
            create_case,
        )
        .action_with_shape(
            "DescribeCases",
            Shape::new()
                .optional("caseIdList", FieldKind::List)
                .optional("displayId", FieldKind::String)
                .optional("includeResolvedCases", FieldKind::Boolean),
            describe_cases,
        )
        .action_with_shape(
            "ResolveCase",
            Shape::new().required("caseId", FieldKind::String),
            resolve_case,
        )
        .action("DescribeSeverityLevels", describe_severity_levels)
        .build()
}
