use crate::commands::parse_record;
use anyhow::{anyhow, Result};
use clap::Args;
use serde_json::json;
use unistore::{HubStore, OutputFormat};

#[derive(Args)]
pub struct ListArgs {
    /// Container name, e.g. notes or todos
    pub container: String,
}

#[derive(Args)]
pub struct GetArgs {
    pub container: String,

    /// Record id
    pub id: String,
}

#[derive(Args)]
pub struct AddArgs {
    pub container: String,

    /// Record as a JSON object, e.g. '{"title": "hello"}'
    pub record: String,
}

#[derive(Args)]
pub struct UpdateArgs {
    pub container: String,

    /// Record as a JSON object including its id
    pub record: String,

    /// Record id; overrides any id in the record
    #[clap(long)]
    pub id: Option<String>,
}

#[derive(Args)]
pub struct RemoveArgs {
    pub container: String,

    pub id: String,
}

pub async fn list(store: &HubStore, args: ListArgs, output_format: OutputFormat) -> Result<()> {
    let records = store.list_all(&args.container).await?;
    if records.is_empty() && !output_format.is_json() {
        println!("No records in '{}'", args.container);
        return Ok(());
    }
    println!("{}", output_format.render_list(&records)?);
    Ok(())
}

pub async fn get(store: &HubStore, args: GetArgs, output_format: OutputFormat) -> Result<()> {
    match store.get_by_id(&args.container, args.id.as_str()).await? {
        Some(record) => {
            println!("{}", output_format.render(&record)?);
            Ok(())
        }
        None => Err(anyhow!(
            "no record with id {} in '{}'",
            args.id,
            args.container
        )),
    }
}

pub async fn add(store: &HubStore, args: AddArgs, output_format: OutputFormat) -> Result<()> {
    let record = parse_record(&args.record)?;
    let id = store.create(&args.container, record).await?;
    match output_format {
        OutputFormat::Table => println!("Added record {} to '{}'", id, args.container),
        format => println!("{}", format.render(&json!({ "id": id }))?),
    }
    Ok(())
}

pub async fn update(store: &HubStore, args: UpdateArgs, output_format: OutputFormat) -> Result<()> {
    let mut record = parse_record(&args.record)?;
    if let (Some(id), Some(object)) = (args.id, record.as_object_mut()) {
        object.insert("id".to_string(), json!(id));
    }
    let id = store.update(&args.container, record).await?;
    match output_format {
        OutputFormat::Table => println!("Updated record {} in '{}'", id, args.container),
        format => println!("{}", format.render(&json!({ "id": id }))?),
    }
    Ok(())
}

pub async fn remove(store: &HubStore, args: RemoveArgs) -> Result<()> {
    store.remove(&args.container, args.id.as_str()).await?;
    println!("Removed record {} from '{}'", args.id, args.container);
    Ok(())
}
