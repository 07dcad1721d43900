use crate::infra::{in_memory_registry, Registry};
use clap::Args;
use placement::config::RegistryConfig;
use placement::error::AppError;
use placement::registry::{
    Company, NewCompany, NewStudent, NumericInput, Offset, PlacementError, RegistrationRequest,
    Student,
};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Page size used for the listing portion of the demo.
    #[arg(long, default_value_t = 10)]
    pub(crate) page_size: usize,
    /// Print the final records as JSON.
    #[arg(long)]
    pub(crate) json: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let registry = in_memory_registry(RegistryConfig {
        page_size: args.page_size.max(1),
        ..RegistryConfig::default()
    });

    println!("Placement registry demo");

    let asha = enrol(&registry, "Asha", "CSE", 86.5)?;
    let ravi = enrol(&registry, "Ravi", "IT", 72.0)?;
    let meera = enrol(&registry, "Meera", "ECE", 91.0)?;
    let initech = recruit(&registry, "Initech", &["CSE", "IT"], 70.0)?;
    let globex = recruit(&registry, "Globex", &["CSE", "ECE"], 85.0)?;

    println!("\nRegistrations");
    for (student, company) in [
        (&asha, &initech),
        (&ravi, &initech),
        (&asha, &globex),
        (&meera, &globex),
        (&ravi, &globex),
        (&meera, &initech),
        (&asha, &initech),
    ] {
        let outcome = registry
            .coordinator()
            .register(RegistrationRequest::new(&student.id, &company.id));
        report("register", student, company, outcome);
    }

    println!("\nUnregistrations");
    for (student, company) in [(&meera, &globex), (&meera, &globex)] {
        let outcome = registry
            .coordinator()
            .unregister(RegistrationRequest::new(&student.id, &company.id));
        report("unregister", student, company, outcome);
    }

    print_state(&registry)?;

    println!("\nDeleting {} and {}", initech.name, asha.full_name());
    registry.records().delete_company(Some(initech.id.0.clone()))?;
    registry.records().delete_student(Some(asha.id.0.clone()))?;
    let processed = registry.settle_cleanup();
    println!("- {processed} cleanup job(s) processed");

    print_state(&registry)?;

    let snapshot = registry.cleanup_snapshot();
    println!(
        "\nCleanup queue: {} pending, {} dead-lettered",
        snapshot.pending.len(),
        snapshot.dead_letters.len()
    );

    if args.json {
        let students = registry.records().list_students(Offset::default())?;
        let companies = registry.records().list_companies(Offset::default())?;
        let payload = serde_json::json!({ "students": students, "companies": companies });
        match serde_json::to_string_pretty(&payload) {
            Ok(json) => println!("\n{json}"),
            Err(err) => println!("\nJSON output unavailable: {err}"),
        }
    }

    Ok(())
}

fn enrol(
    registry: &Registry,
    first_name: &str,
    branch: &str,
    aggregate: f64,
) -> Result<Student, PlacementError> {
    registry.records().create_student(NewStudent {
        first_name: Some(first_name.to_string()),
        last_name: Some("Demo".to_string()),
        email: Some(format!("{}@campus.edu", first_name.to_lowercase())),
        contact_number: Some("9876543210".to_string()),
        dob: Some("2002-01-15".to_string()),
        branch: Some(branch.to_string()),
        aggregate: Some(NumericInput::Number(aggregate)),
        ..NewStudent::default()
    })
}

fn recruit(
    registry: &Registry,
    name: &str,
    branches: &[&str],
    threshold: f64,
) -> Result<Company, PlacementError> {
    registry.records().create_company(NewCompany {
        name: Some(name.to_string()),
        email: Some(format!("careers@{}.com", name.to_lowercase())),
        contact_number: Some("0123456789".to_string()),
        aggregate_threshold: Some(NumericInput::Number(threshold)),
        allowed_branches: Some(branches.iter().map(|branch| branch.to_string()).collect()),
    })
}

fn report(
    action: &str,
    student: &Student,
    company: &Company,
    outcome: Result<(), PlacementError>,
) {
    match outcome {
        Ok(()) => println!("- {action} {} @ {}: ok", student.full_name(), company.name),
        Err(err) => println!(
            "- {action} {} @ {}: {} ({})",
            student.full_name(),
            company.name,
            err.label(),
            err
        ),
    }
}

fn print_state(registry: &Registry) -> Result<(), PlacementError> {
    let students = registry.records().list_students(Offset::default())?;
    let companies = registry.records().list_companies(Offset::default())?;

    println!("\nStudents ({})", students.count);
    for student in &students.items {
        println!(
            "- {} {} [{} | {:.1}] applied to {}",
            student.id,
            student.full_name(),
            student.branch,
            student.aggregate,
            student.applied_count
        );
    }

    println!("Companies ({})", companies.count);
    for company in &companies.items {
        let applicants = company
            .applied
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "- {} {} (>= {:.1}) applicants: [{}]",
            company.id, company.name, company.aggregate_threshold, applicants
        );
    }
    Ok(())
}
