//! Output rendering and formatting

use comfy_table::{presets::UTF8_FULL, Attribute, Cell, ContentArrangement, Table};
use console::Style;
use serde_json::json;
use sideload_types::{InstallState, PackageMetadata};
use std::io;

/// Output renderer for CLI results
#[derive(Clone)]
pub struct OutputRenderer {
    /// Use JSON output format
    json_output: bool,
    /// Emit ANSI styling
    colors_enabled: bool,
}

impl OutputRenderer {
    /// Create new output renderer
    pub fn new(json_output: bool, colors_enabled: bool) -> Self {
        Self {
            json_output,
            colors_enabled,
        }
    }

    /// Render the analysed package
    pub fn render_package(
        &self,
        source: &str,
        meta: &PackageMetadata,
        is_update: bool,
    ) -> io::Result<()> {
        if self.json_output {
            let value = json!({
                "source": source,
                "label": meta.label,
                "packageId": meta.package_id,
                "versionName": meta.version_name,
                "isUpdate": is_update,
                "icon": meta.icon.as_ref().map(|icon| json!({
                    "width": icon.width(),
                    "height": icon.height(),
                })),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&value).map_err(io::Error::other)?
            );
            return Ok(());
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("Field").add_attribute(Attribute::Bold),
            Cell::new("Value").add_attribute(Attribute::Bold),
        ]);

        let icon = meta.icon.as_ref().map_or_else(
            || "-".to_string(),
            |icon| format!("{}x{}", icon.width(), icon.height()),
        );
        let action = if is_update { "update" } else { "new install" };
        table.add_row(vec![Cell::new("Label"), Cell::new(&meta.label)]);
        table.add_row(vec![Cell::new("Package"), Cell::new(&meta.package_id)]);
        table.add_row(vec![Cell::new("Version"), Cell::new(&meta.version_name)]);
        table.add_row(vec![Cell::new("Icon"), Cell::new(icon)]);
        table.add_row(vec![Cell::new("Action"), Cell::new(action)]);

        println!("{}", self.style_name(source));
        println!("{table}");
        Ok(())
    }

    /// Render the final state of an install attempt
    pub fn render_outcome(&self, meta: Option<&PackageMetadata>, state: &InstallState) -> io::Result<()> {
        if self.json_output {
            let value = match state {
                InstallState::Success => json!({
                    "status": "success",
                    "packageId": meta.map(|m| m.package_id.as_str()),
                }),
                InstallState::Error { message } => json!({
                    "status": "error",
                    "message": message,
                }),
                other => json!({ "status": other.name() }),
            };
            println!("{value}");
            return Ok(());
        }

        if let InstallState::Success = state {
            let name = meta.map_or("package", |m| m.label.as_str());
            println!("{} {name}", self.style_success("Installed"));
        }
        Ok(())
    }

    fn style_name(&self, name: &str) -> String {
        Style::new()
            .bold()
            .cyan()
            .force_styling(self.colors_enabled)
            .apply_to(name)
            .to_string()
    }

    fn style_success(&self, text: &str) -> String {
        Style::new()
            .green()
            .force_styling(self.colors_enabled)
            .apply_to(text)
            .to_string()
    }
}
