use anyhow::Result;
use riskassess::riskassess::openapi::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<()> {
    let json = serde_json::to_string_pretty(&ApiDoc::openapi())?;
    println!("{json}");
    Ok(())
}
