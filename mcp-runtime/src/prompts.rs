//! Prompt templates and the object schema resource.

use serde_json::{Value, json};

use crate::config::ToolFilter;

pub const SCHEMA_REFERENCE_URI: &str = "evo://objects/schema-reference";

#[derive(Debug, Clone, Copy)]
pub struct PromptDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub text: &'static str,
    visible_under: &'static [ToolFilter],
}

impl PromptDefinition {
    pub fn is_visible(&self, filter: ToolFilter) -> bool {
        self.visible_under.contains(&filter)
    }

    pub fn to_list_entry(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "arguments": [],
        })
    }

    pub fn to_get_payload(&self) -> Value {
        json!({
            "description": self.description,
            "messages": [{
                "role": "user",
                "content": { "type": "text", "text": self.text },
            }],
        })
    }
}

const ALL_PROMPT: &str = "\
You are an assistant for the Seequent Evo platform.

You can help users with:
- Selecting the Evo instance (organisation) to work with
- Listing, inspecting and creating workspaces
- Summarising and snapshotting workspace contents
- Listing objects and reading object metadata and definitions
- Copying objects between workspaces and duplicating whole workspaces
- Previewing local CSV files and importing them as pointsets, line segments, downhole collections or downhole intervals

Always be clear about which instance and workspace you are working in. If you need a workspace_id, ask the user or call list_workspaces first.
Bulk operations (workspace_duplicate_workspace, import_csv) can create many objects; confirm their scope with the user before running them.
The resource evo://objects/schema-reference lists the fields each import target expects.
If a tool returns an error, report its kind and message; errors marked retryable may be retried.";

const ADMIN_PROMPT: &str = "\
You are an administration assistant for Seequent Evo workspaces.

You can help users with:
- Selecting the Evo instance (organisation) to work with
- Listing and discovering workspaces
- Reading workspace details and object counts by schema
- Creating workspaces
- Recording workspace snapshots
- Copying objects and duplicating workspaces, optionally filtered by schema or name
- Checking service health

When a user asks about workspaces, use the tools to give accurate information and always say which workspace you are working with.
If a tool returns an error, return its full message to help troubleshoot.";

const DATA_PROMPT: &str = "\
You are a data import specialist for the Seequent Evo platform. You turn local CSV files into geoscience objects.

Supported targets (see evo://objects/schema-reference for every field):
| target_kind | Required columns | Use case |
|-------------|------------------|----------|
| pointset | x, y, z | Sample locations, sensors |
| line_segments | line_id, sequence, x, y, z | Faults, contacts, traverses |
| downhole_collection | hole_id, x, y, z, depth, azimuth, dip | Collars and surveys |
| downhole_intervals | hole_id, from, to, start_x/y/z, end_x/y/z | Assays, lithology logs |

Other columns become attributes. Use `columns` to map a field to a differently named header, e.g. {\"x\": \"Easting\"}, and `group_by` to create one object per value of a column.

Recommended workflow:
1. list_local_data_files(file_pattern=\"*.csv\") to find candidate files.
2. preview_csv_file(file_path=...) to check headers, types and which targets the file already satisfies.
3. import_csv(..., dry_run=true) and review the per-row results with the user.
4. import_csv(..., dry_run=false) once the rows that will be rejected are understood.

Report created objects by path and id, and list the rows that failed with their reasons.";

const PROMPTS: &[PromptDefinition] = &[
    PromptDefinition {
        name: "all_prompt",
        description: "Assistant covering every Evo tool.",
        text: ALL_PROMPT,
        visible_under: &[ToolFilter::All],
    },
    PromptDefinition {
        name: "admin_prompt",
        description: "Assistant for workspace management.",
        text: ADMIN_PROMPT,
        visible_under: &[ToolFilter::All, ToolFilter::Admin],
    },
    PromptDefinition {
        name: "data_prompt",
        description: "Assistant for importing local CSV data as geoscience objects.",
        text: DATA_PROMPT,
        visible_under: &[ToolFilter::All, ToolFilter::Data],
    },
];

pub fn visible_prompts(filter: ToolFilter) -> impl Iterator<Item = &'static PromptDefinition> {
    PROMPTS.iter().filter(move |p| p.is_visible(filter))
}

pub fn find_prompt(filter: ToolFilter, name: &str) -> Option<&'static PromptDefinition> {
    visible_prompts(filter).find(|p| p.name == name)
}

pub fn schema_reference_resource() -> Value {
    json!({
        "uri": SCHEMA_REFERENCE_URI,
        "name": "Geoscience object import reference",
        "description": "Fields, types and validation rules for every import_csv target kind.",
        "mimeType": "text/markdown",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(filter: ToolFilter) -> Vec<&'static str> {
        visible_prompts(filter).map(|p| p.name).collect()
    }

    #[test]
    fn prompts_follow_the_tool_filter() {
        assert_eq!(names(ToolFilter::All), vec!["all_prompt", "admin_prompt", "data_prompt"]);
        assert_eq!(names(ToolFilter::Admin), vec!["admin_prompt"]);
        assert_eq!(names(ToolFilter::Data), vec!["data_prompt"]);
        assert!(find_prompt(ToolFilter::Data, "admin_prompt").is_none());
    }

    #[test]
    fn data_prompt_recommends_dry_run_first() {
        let prompt = find_prompt(ToolFilter::Data, "data_prompt").unwrap();
        let payload = prompt.to_get_payload();
        let text = payload["messages"][0]["content"]["text"].as_str().unwrap();
        assert!(text.find("dry_run=true").unwrap() < text.find("dry_run=false").unwrap());
    }
}
