use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned identifier for a student record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub String);

/// Store-assigned identifier for a company record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyId(pub String);

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StudentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<String> for CompanyId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The two record kinds held by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Student,
    Company,
}

impl EntityKind {
    pub const fn label(self) -> &'static str {
        match self {
            EntityKind::Student => "student",
            EntityKind::Company => "company",
        }
    }

    pub const fn id_prefix(self) -> &'static str {
        match self {
            EntityKind::Student => "stu",
            EntityKind::Company => "cmp",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Academic branches a student can belong to and a company can recruit from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Branch {
    Cse,
    It,
    Ece,
    Eee,
    Ice,
}

impl Branch {
    pub const ALL: [Branch; 5] = [
        Branch::Cse,
        Branch::It,
        Branch::Ece,
        Branch::Eee,
        Branch::Ice,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Branch::Cse => "CSE",
            Branch::It => "IT",
            Branch::Ece => "ECE",
            Branch::Eee => "EEE",
            Branch::Ice => "ICE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|branch| branch.label() == raw.trim())
    }

    pub fn all() -> BTreeSet<Branch> {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            "other" => Some(Gender::Other),
            _ => None,
        }
    }
}

/// A student enrolled in the placement program.
///
/// `applied_count` mirrors the number of companies whose `applied` list holds this
/// student's id. Only the registration coordinator and the cascade cleanup move it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: StudentId,
    pub created_at: DateTime<Utc>,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub contact_number: String,
    pub dob: NaiveDate,
    pub gender: Gender,
    pub branch: Branch,
    pub aggregate: f64,
    pub applied_count: u32,
    pub revision: u64,
}

impl Student {
    pub fn full_name(&self) -> String {
        [&self.first_name, &self.middle_name, &self.last_name]
            .into_iter()
            .filter(|part| !part.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A recruiting company and the ordered list of students registered with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: CompanyId,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
    pub contact_number: String,
    pub aggregate_threshold: f64,
    pub allowed_branches: BTreeSet<Branch>,
    pub applied: Vec<StudentId>,
    pub revision: u64,
}

impl Company {
    pub fn has_applicant(&self, student_id: &StudentId) -> bool {
        self.applied.contains(student_id)
    }

    /// Appends the student in registration order. Returns `false` when already present.
    pub fn add_applicant(&mut self, student_id: &StudentId) -> bool {
        if self.has_applicant(student_id) {
            return false;
        }
        self.applied.push(student_id.clone());
        true
    }

    /// Removes the student's entry. Returns `false` when there was none.
    pub fn remove_applicant(&mut self, student_id: &StudentId) -> bool {
        match self.applied.iter().position(|id| id == student_id) {
            Some(index) => {
                self.applied.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Numeric input accepted either as a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumericInput {
    Number(f64),
    Text(String),
}

impl NumericInput {
    pub fn value(&self) -> Option<f64> {
        match self {
            NumericInput::Number(value) => Some(*value),
            NumericInput::Text(raw) => raw.trim().parse::<f64>().ok(),
        }
    }
}

impl From<f64> for NumericInput {
    fn from(value: f64) -> Self {
        NumericInput::Number(value)
    }
}

/// Body of `POST /student/create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStudent {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub contact_number: Option<String>,
    pub dob: Option<String>,
    pub gender: Option<String>,
    pub branch: Option<String>,
    pub aggregate: Option<NumericInput>,
}

/// Body of `PUT /student/update`. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentPatch {
    pub id: Option<String>,
    pub email: Option<String>,
    pub contact_number: Option<String>,
    pub aggregate: Option<NumericInput>,
    pub branch: Option<String>,
}

/// Body of `POST /company/create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCompany {
    pub name: Option<String>,
    pub email: Option<String>,
    pub contact_number: Option<String>,
    pub aggregate_threshold: Option<NumericInput>,
    pub allowed_branches: Option<Vec<String>>,
}

/// Body of `PUT /company/update`. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyPatch {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub contact_number: Option<String>,
    pub aggregate_threshold: Option<NumericInput>,
    pub allowed_branches: Option<Vec<String>>,
}

/// Body of `POST /register` and `DELETE /register`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub student_id: Option<String>,
    pub company_id: Option<String>,
}

impl RegistrationRequest {
    pub fn new(student_id: &StudentId, company_id: &CompanyId) -> Self {
        Self {
            student_id: Some(student_id.0.clone()),
            company_id: Some(company_id.0.clone()),
        }
    }
}

/// Body of the `DELETE /student` and `DELETE /company` endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub id: Option<String>,
}
