use anyhow::Result;
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use unistore::{HubStore, OutputFormat};

#[derive(Debug, Serialize, Tabled)]
struct ContainerRow {
    container: String,
    required: bool,
}

pub async fn run(store: &HubStore, output_format: OutputFormat) -> Result<()> {
    let status = store.status().await?;

    match output_format {
        OutputFormat::Table => {
            println!("Store:   {}", status.name);
            println!("Version: {}", status.version);
            println!("{}", Table::new(&status.containers).with(Style::rounded()));
        }
        format => println!("{}", format.render(&status)?),
    }
    Ok(())
}

pub async fn run_containers(store: &HubStore, output_format: OutputFormat) -> Result<()> {
    let status = store.status().await?;
    let rows: Vec<ContainerRow> = status
        .containers
        .into_iter()
        .map(|c| ContainerRow {
            container: c.name,
            required: c.required,
        })
        .collect();

    match output_format {
        OutputFormat::Table => println!("{}", Table::new(&rows).with(Style::rounded())),
        format => println!("{}", format.render_list(&rows)?),
    }
    Ok(())
}
