//! Default table and column names for mappings that do not spell them out.

use inflector::Inflector;

/// Derives physical names from entity and attribute names.
pub trait NamingStrategy: std::fmt::Debug + Send + Sync {
    fn table_name(&self, entity: &str) -> String;

    fn column_name(&self, attribute: &str) -> String;

    fn foreign_key_column(&self, association: &str) -> String {
        format!("{}_id", self.column_name(association))
    }
}

/// `EmployeeDetails` -> `employee_details`, `hireDate` -> `hire_date`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnakeCaseNaming;

impl NamingStrategy for SnakeCaseNaming {
    fn table_name(&self, entity: &str) -> String {
        // package prefixes never reach the table name
        let short = entity.rsplit('.').next().unwrap_or(entity);
        short.to_snake_case()
    }

    fn column_name(&self, attribute: &str) -> String {
        attribute.to_snake_case()
    }
}
