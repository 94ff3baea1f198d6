use admin_core::{AdminError, FieldConfig, ModelHandler, Rule};

pub fn handler() -> Result<ModelHandler, AdminError> {
    ModelHandler::builder("categories", "catalog_categories")
        .label("Categories")
        .field(
            FieldConfig::text("name")
                .rules([Rule::Required, Rule::MaxLength(255), Rule::Unique])
                .searchable()
                .sortable(),
        )
        .field(FieldConfig::text("description").hide_from_list().searchable())
        .field(FieldConfig::datetime("create_date").label("created").readonly().sortable())
        .policy(super::catalog_policy())
        .default_sort("name")
        .build()
}
