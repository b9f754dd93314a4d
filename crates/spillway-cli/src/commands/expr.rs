use crate::{ExprArgs, OutputFormat};
use spillway_cdc::NoFieldExpression;

pub fn handle(args: ExprArgs, format: OutputFormat) -> anyhow::Result<()> {
    let expression = NoFieldExpression::create(&args.name, args.default)?;
    let value = expression.eval();

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "expression": expression.name(),
                "type": expression.output_type().to_string(),
                "default": expression.default_value(),
                "value": value,
            });
            println!("{}", serde_json::to_string(&output)?);
        }
        OutputFormat::Text => {
            println!(
                "{} {} = {}",
                expression.name(),
                expression.output_type(),
                value
            );
        }
    }

    Ok(())
}
