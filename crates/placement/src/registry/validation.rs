//! Field-level validation for request bodies.
//!
//! Every validator collects all violations before failing so a caller can fix a
//! request in one round trip.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;

use super::domain::{
    Branch, Company, CompanyId, CompanyPatch, Gender, NewCompany, NewStudent, NumericInput,
    RegistrationRequest, Student, StudentId, StudentPatch,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn contact_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9]{10}$").expect("contact pattern compiles"))
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles")
    })
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("id pattern compiles"))
}

/// Accumulates violations while individual fields are checked.
#[derive(Default)]
struct Checker {
    violations: Vec<FieldViolation>,
}

impl Checker {
    fn reject(&mut self, field: &str, message: impl Into<String>) {
        self.violations.push(FieldViolation::new(field, message));
    }

    fn required_text(&mut self, field: &str, raw: Option<String>) -> Option<String> {
        match raw.map(|value| value.trim().to_string()) {
            Some(value) if !value.is_empty() => Some(value),
            _ => {
                self.reject(field, "is required");
                None
            }
        }
    }

    fn optional_text(&mut self, field: &str, raw: Option<String>) -> Option<String> {
        match raw.map(|value| value.trim().to_string()) {
            Some(value) if value.is_empty() => {
                self.reject(field, "must not be blank");
                None
            }
            other => other,
        }
    }

    fn email(&mut self, field: &str, raw: Option<String>, required: bool) -> Option<String> {
        let value = if required {
            self.required_text(field, raw)?
        } else {
            self.optional_text(field, raw)?
        };
        if email_pattern().is_match(&value) {
            Some(value.to_lowercase())
        } else {
            self.reject(field, "must be a valid email address");
            None
        }
    }

    fn contact_number(
        &mut self,
        field: &str,
        raw: Option<String>,
        required: bool,
    ) -> Option<String> {
        let value = if required {
            self.required_text(field, raw)?
        } else {
            self.optional_text(field, raw)?
        };
        if contact_pattern().is_match(&value) {
            Some(value)
        } else {
            self.reject(field, "must be exactly 10 digits");
            None
        }
    }

    fn score(&mut self, field: &str, raw: Option<NumericInput>, required: bool) -> Option<f64> {
        let Some(raw) = raw else {
            if required {
                self.reject(field, "is required");
            }
            return None;
        };
        match raw.value() {
            Some(value) if value.is_finite() && (0.0..=100.0).contains(&value) => Some(value),
            Some(_) => {
                self.reject(field, "must be between 0 and 100");
                None
            }
            None => {
                self.reject(field, "must be numeric");
                None
            }
        }
    }

    fn branch(&mut self, field: &str, raw: Option<String>, required: bool) -> Option<Branch> {
        let value = if required {
            self.required_text(field, raw)?
        } else {
            self.optional_text(field, raw)?
        };
        let branch = Branch::parse(&value);
        if branch.is_none() {
            self.reject(field, format!("unknown branch '{value}'"));
        }
        branch
    }

    fn branches(&mut self, field: &str, raw: Option<Vec<String>>) -> Option<BTreeSet<Branch>> {
        let values = raw?;
        let mut branches = BTreeSet::new();
        let mut valid = true;
        for value in values {
            match Branch::parse(&value) {
                Some(branch) => {
                    branches.insert(branch);
                }
                None => {
                    self.reject(field, format!("unknown branch '{value}'"));
                    valid = false;
                }
            }
        }
        valid.then_some(branches)
    }

    fn entity_id(&mut self, field: &str, raw: Option<String>) -> Option<String> {
        let value = self.required_text(field, raw)?;
        if id_pattern().is_match(&value) {
            Some(value)
        } else {
            self.reject(field, "is not a well-formed identifier");
            None
        }
    }

    fn finish<T>(self, value: Option<T>) -> Result<T, Vec<FieldViolation>> {
        match value {
            Some(value) if self.violations.is_empty() => Ok(value),
            _ => Err(self.violations),
        }
    }
}

/// Checks a raw identifier taken from a path or body field.
pub fn entity_id(field: &str, raw: Option<String>) -> Result<String, Vec<FieldViolation>> {
    let mut checker = Checker::default();
    let value = checker.entity_id(field, raw);
    checker.finish(value)
}

pub fn registration_ids(
    request: RegistrationRequest,
) -> Result<(StudentId, CompanyId), Vec<FieldViolation>> {
    let mut checker = Checker::default();
    let student_id = checker.entity_id("studentId", request.student_id);
    let company_id = checker.entity_id("companyId", request.company_id);
    let ids = student_id
        .zip(company_id)
        .map(|(student_id, company_id)| (StudentId(student_id), CompanyId(company_id)));
    checker.finish(ids)
}

/// Builds an unsaved student; the store assigns its id.
pub fn new_student(
    request: NewStudent,
    created_at: DateTime<Utc>,
) -> Result<Student, Vec<FieldViolation>> {
    let mut checker = Checker::default();

    let first_name = checker.required_text("firstName", request.first_name);
    let middle_name = checker.optional_text("middleName", request.middle_name);
    let last_name = checker.optional_text("lastName", request.last_name);
    let email = checker.email("email", request.email, false);
    let contact_number = checker.contact_number("contactNumber", request.contact_number, true);
    let dob = checker
        .required_text("dob", request.dob)
        .and_then(|raw| match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                checker.reject("dob", "must be a date formatted YYYY-MM-DD");
                None
            }
        });
    let gender = match checker.optional_text("gender", request.gender) {
        Some(raw) => Gender::parse(&raw).or_else(|| {
            checker.reject("gender", "must be one of male, female, other");
            None
        }),
        None => Some(Gender::default()),
    };
    let branch = checker.branch("branch", request.branch, true);
    let aggregate = checker.score("aggregate", request.aggregate, true);

    let student = match (first_name, contact_number, dob, gender, branch, aggregate) {
        (
            Some(first_name),
            Some(contact_number),
            Some(dob),
            Some(gender),
            Some(branch),
            Some(aggregate),
        ) => Some(Student {
            id: StudentId::default(),
            created_at,
            first_name,
            middle_name: middle_name.unwrap_or_default(),
            last_name: last_name.unwrap_or_default(),
            email,
            contact_number,
            dob,
            gender,
            branch,
            aggregate,
            applied_count: 0,
            revision: 0,
        }),
        _ => None,
    };
    checker.finish(student)
}

/// Validated subset of student fields an update may change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentChanges {
    pub email: Option<String>,
    pub contact_number: Option<String>,
    pub aggregate: Option<f64>,
    pub branch: Option<Branch>,
}

impl StudentChanges {
    pub fn apply(self, student: &mut Student) {
        if let Some(email) = self.email {
            student.email = Some(email);
        }
        if let Some(contact_number) = self.contact_number {
            student.contact_number = contact_number;
        }
        if let Some(aggregate) = self.aggregate {
            student.aggregate = aggregate;
        }
        if let Some(branch) = self.branch {
            student.branch = branch;
        }
    }
}

pub fn student_patch(
    request: StudentPatch,
) -> Result<(StudentId, StudentChanges), Vec<FieldViolation>> {
    let mut checker = Checker::default();
    let id = checker.entity_id("id", request.id);
    let changes = StudentChanges {
        email: checker.email("email", request.email, false),
        contact_number: checker.contact_number("contactNumber", request.contact_number, false),
        aggregate: checker.score("aggregate", request.aggregate, false),
        branch: checker.branch("branch", request.branch, false),
    };
    checker.finish(id.map(|id| (StudentId(id), changes)))
}

/// Builds an unsaved company; the store assigns its id.
pub fn new_company(
    request: NewCompany,
    created_at: DateTime<Utc>,
) -> Result<Company, Vec<FieldViolation>> {
    let mut checker = Checker::default();

    let name = checker.required_text("name", request.name);
    let email = checker.email("email", request.email, true);
    let contact_number = checker.contact_number("contactNumber", request.contact_number, true);
    let aggregate_threshold =
        checker.score("aggregateThreshold", request.aggregate_threshold, true);
    let allowed_branches = match request.allowed_branches {
        Some(raw) => checker.branches("allowedBranches", Some(raw)),
        None => Some(Branch::all()),
    };

    let company = match (name, email, contact_number, aggregate_threshold, allowed_branches) {
        (
            Some(name),
            Some(email),
            Some(contact_number),
            Some(aggregate_threshold),
            Some(allowed_branches),
        ) => Some(Company {
            id: CompanyId::default(),
            created_at,
            name,
            email,
            contact_number,
            aggregate_threshold,
            allowed_branches,
            applied: Vec::new(),
            revision: 0,
        }),
        _ => None,
    };
    checker.finish(company)
}

/// Validated subset of company fields an update may change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompanyChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub contact_number: Option<String>,
    pub aggregate_threshold: Option<f64>,
    pub allowed_branches: Option<BTreeSet<Branch>>,
}

impl CompanyChanges {
    pub fn apply(self, company: &mut Company) {
        if let Some(name) = self.name {
            company.name = name;
        }
        if let Some(email) = self.email {
            company.email = email;
        }
        if let Some(contact_number) = self.contact_number {
            company.contact_number = contact_number;
        }
        if let Some(aggregate_threshold) = self.aggregate_threshold {
            company.aggregate_threshold = aggregate_threshold;
        }
        if let Some(allowed_branches) = self.allowed_branches {
            company.allowed_branches = allowed_branches;
        }
    }
}

pub fn company_patch(
    request: CompanyPatch,
) -> Result<(CompanyId, CompanyChanges), Vec<FieldViolation>> {
    let mut checker = Checker::default();
    let id = checker.entity_id("id", request.id);
    let changes = CompanyChanges {
        name: checker.optional_text("name", request.name),
        email: checker.email("email", request.email, false),
        contact_number: checker.contact_number("contactNumber", request.contact_number, false),
        aggregate_threshold: checker.score(
            "aggregateThreshold",
            request.aggregate_threshold,
            false,
        ),
        allowed_branches: checker.branches("allowedBranches", request.allowed_branches),
    };
    checker.finish(id.map(|id| (CompanyId(id), changes)))
}
