#![allow(dead_code)]
use async_trait::async_trait;
use odata_processor::convert::{ConverterRegistry, ValueConverter};
use odata_processor::result::ColumnSpec;
use odata_processor::schema::{Association, Attribute, EdmPrimitive, JoinColumn, Schema, StorageType, StructuredType};
use odata_processor::{DbValue, ODataProcessor, ProcessorConfig, Result, Tuple, TupleExecutor};
use sea_orm::sea_query::{SelectStatement, SqliteQueryBuilder};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replays queued row sets and records the SQL of every statement.
#[derive(Default)]
pub struct ScriptedExecutor {
    results: Mutex<VecDeque<Vec<Tuple>>>,
    statements: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn push(&self, rows: Vec<Tuple>) {
        self.results.lock().unwrap().push_back(rows);
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl TupleExecutor for ScriptedExecutor {
    async fn execute(&self, stmt: &SelectStatement, _columns: &[ColumnSpec]) -> Result<Vec<Tuple>> {
        self.statements
            .lock()
            .unwrap()
            .push(stmt.to_string(SqliteQueryBuilder));
        Ok(self.results.lock().unwrap().pop_front().unwrap_or_default())
    }
}

pub fn text(s: &str) -> DbValue {
    DbValue::String(Some(Box::new(s.to_string())))
}

pub fn processor_over(
    schema: Schema,
    config: ProcessorConfig,
    executor: Arc<dyn TupleExecutor>,
) -> ODataProcessor {
    ODataProcessor::new(
        Arc::new(schema),
        Arc::new(ValueConverter::new(Arc::new(ConverterRegistry::with_defaults()))),
        config,
        executor,
    )
}

pub fn scripted_processor() -> (ODataProcessor, Arc<ScriptedExecutor>) {
    let executor = Arc::new(ScriptedExecutor::default());
    let processor = processor_over(crm_schema(), ProcessorConfig::default(), executor.clone());
    (processor, executor)
}

/// Persons with roles, tags and in-house addresses.
pub fn crm_schema() -> Schema {
    let address = Arc::new(
        StructuredType::complex("Address")
            .attribute(Attribute::primitive("Street", EdmPrimitive::String, StorageType::String).column("street"))
            .attribute(Attribute::primitive("Country", EdmPrimitive::String, StorageType::String).column("country")),
    );
    let person = StructuredType::entity("Person", "person")
        .attribute(Attribute::primitive("ID", EdmPrimitive::String, StorageType::String).column("id").key())
        .attribute(
            Attribute::primitive("Name", EdmPrimitive::String, StorageType::String)
                .column("name")
                .searchable(),
        )
        .attribute(Attribute::primitive("Age", EdmPrimitive::Int32, StorageType::Int).column("age"))
        .attribute(Attribute::primitive("Active", EdmPrimitive::Boolean, StorageType::Bool).column("active"))
        .attribute(
            Attribute::primitive("Tags", EdmPrimitive::String, StorageType::String)
                .column("tag")
                .element_collection("person_tag", vec![JoinColumn::new("id", "person_id")]),
        )
        .attribute(
            Attribute::complex("InhouseAddress", address)
                .element_collection("inhouse_address", vec![JoinColumn::new("id", "person_id")]),
        )
        .association(Association::to_many("Roles", "Role").join("id", "person_id"));
    let role = StructuredType::entity("Role", "role")
        .attribute(Attribute::primitive("RoleID", EdmPrimitive::Int32, StorageType::Int).column("role_id").key())
        .attribute(Attribute::primitive("RoleCategory", EdmPrimitive::String, StorageType::String).column("category"))
        .attribute(Attribute::primitive("PersonID", EdmPrimitive::String, StorageType::String).column("person_id"))
        .association(Association::to_one("Person", "Person").join("person_id", "id"));
    Schema::builder()
        .entity_set("Persons", person)
        .entity_set("Roles", role)
        .build()
        .unwrap()
}
