// Service listing command

use anyhow::Result;
use dash_engine::config::DashConfig;
use dash_engine::service::ServiceRegistry;
use serde::Serialize;

use crate::output::{print_table_header, print_table_row, OutputFormat};

#[derive(Debug, Serialize)]
struct ServiceInfo {
    name: String,
    selected: bool,
}

pub fn run(config: &DashConfig, output: OutputFormat) -> Result<()> {
    let registry = ServiceRegistry::with_builtin();
    let services: Vec<ServiceInfo> = registry
        .names()
        .into_iter()
        .map(|name| ServiceInfo {
            selected: name == config.service,
            name: name.to_string(),
        })
        .collect();

    if !output.is_text() {
        return output.print_value(&services);
    }

    print_table_header(&[("NAME", 16), ("SELECTED", 8)]);
    for service in &services {
        let selected = if service.selected { "*" } else { "" };
        print_table_row(&[(&service.name, 16), (selected, 8)]);
    }
    Ok(())
}
