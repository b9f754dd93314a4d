use crate::{Catalog, OptionsArgs, OutputFormat};
use anyhow::Context;
use spillway_disk::config;
use spillway_options::catalog::hive;
use spillway_options::{Options, OptionsSchema};
use std::fs;

pub fn handle(args: OptionsArgs, format: OutputFormat) -> anyhow::Result<()> {
    let schemas = schemas(args.catalog);

    if let Some(path) = args.check {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let options = Options::from_toml_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        let combined = schemas
            .iter()
            .fold(OptionsSchema::new("combined"), |acc, schema| acc.merge(schema));
        combined
            .validate(&options)
            .with_context(|| format!("Invalid options in {}", path.display()))?;

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "valid": true,
                    "file": path.display().to_string(),
                    "options": options.len(),
                });
                println!("{}", serde_json::to_string(&output)?);
            }
            OutputFormat::Text => {
                println!("{}: {} options OK", path.display(), options.len());
            }
        }
        return Ok(());
    }

    match format {
        OutputFormat::Json => {
            let entries: Vec<_> = schemas
                .iter()
                .flat_map(|schema| {
                    schema.iter().map(|descriptor| {
                        serde_json::json!({
                            "catalog": schema.name(),
                            "key": descriptor.key,
                            "kind": descriptor.kind.name(),
                            "default": descriptor.default,
                            "description": descriptor.description,
                        })
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Text => {
            for schema in &schemas {
                println!("[{}]", schema.name());
                for descriptor in schema.iter() {
                    println!("  {descriptor}");
                }
            }
        }
    }

    Ok(())
}

fn schemas(catalog: Catalog) -> Vec<OptionsSchema> {
    match catalog {
        Catalog::Spill => vec![config::schema()],
        Catalog::Hive => vec![hive::schema()],
        Catalog::All => vec![config::schema(), hive::schema()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schemas_per_catalog() {
        assert_eq!(schemas(Catalog::Spill).len(), 1);
        assert!(schemas(Catalog::Hive)[0].get(hive::HIVE_CONF_DIR.key()).is_some());
        assert_eq!(schemas(Catalog::All).len(), 2);
    }
}
