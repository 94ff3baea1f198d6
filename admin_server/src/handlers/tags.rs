use admin_core::{AdminError, FieldConfig, ModelHandler, Rule};
use regex::Regex;

pub fn handler() -> Result<ModelHandler, AdminError> {
    let hex_color = Regex::new(r"^#[0-9a-fA-F]{6}$")
        .map_err(|e| AdminError::Config(format!("tags: color pattern: {e}")))?;

    ModelHandler::builder("tags", "catalog_tags")
        .label("Tags")
        .field(
            FieldConfig::text("name")
                .rules([Rule::Required, Rule::MaxLength(64), Rule::Unique])
                .searchable()
                .sortable(),
        )
        .field(FieldConfig::text("color").rule(Rule::Pattern(hex_color)))
        .policy(super::catalog_policy())
        .default_sort("name")
        .build()
}
