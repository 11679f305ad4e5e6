//! Retrieval functions the model may request mid-stream.

use serde_json::{json, Value};

/// Closed set of retrieval capabilities exposed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantFunction {
    SearchOnWeb,
    SearchOnIndexData,
    SearchOnWebAndIndexData,
}

impl AssistantFunction {
    pub fn name(self) -> &'static str {
        match self {
            AssistantFunction::SearchOnWeb => "search_on_web",
            AssistantFunction::SearchOnIndexData => "search_on_index_data",
            AssistantFunction::SearchOnWebAndIndexData => "search_on_web_and_index_data",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "search_on_web" => Some(AssistantFunction::SearchOnWeb),
            "search_on_index_data" => Some(AssistantFunction::SearchOnIndexData),
            "search_on_web_and_index_data" => Some(AssistantFunction::SearchOnWebAndIndexData),
            _ => None,
        }
    }

    /// Shown to the client while the model is still generating the arguments.
    pub fn action_label(self) -> &'static str {
        match self {
            AssistantFunction::SearchOnWeb => "Searching external sources",
            AssistantFunction::SearchOnIndexData => "Analyzing internal documents",
            AssistantFunction::SearchOnWebAndIndexData => {
                "Searching internal and external sources together"
            }
        }
    }

    /// JSON-schema descriptor advertised to the model.
    pub fn descriptor(self) -> Value {
        match self {
            AssistantFunction::SearchOnWeb => json!({
                "name": "search_on_web",
                "description": "Useful for questions about the latest topics and current conditions such as today's date, temperature, weather, or exchange rates. The input is the content to search for.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The content to search for.",
                        },
                    },
                    "required": ["query"],
                },
            }),
            AssistantFunction::SearchOnIndexData => json!({
                "name": "search_on_index_data",
                "description": "Useful for questions about the organization's own documents and internal data.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The content to search for.",
                        },
                    },
                    "required": ["query"],
                },
            }),
            AssistantFunction::SearchOnWebAndIndexData => json!({
                "name": "search_on_web_and_index_data",
                "description": "Useful for comparing the organization's internal information with external or up-to-date information from the internet, or for combining both into a single analysis.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "index_data_search_query": {
                            "type": "string",
                            "description": "The content to search for in the organization's internal data.",
                        },
                        "web_search_query": {
                            "type": "string",
                            "description": "The content to search for in external and up-to-date sources.",
                        },
                    },
                    "required": ["index_data_search_query", "web_search_query"],
                },
            }),
        }
    }
}

/// Capability switches deciding which functions one conversation exposes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FunctionFlags {
    pub enable_index: bool,
    pub enable_web: bool,
    pub enable_combined: bool,
}

/// Builds the active function set. Combined search is mutually exclusive with
/// the individual functions and replaces them entirely.
pub fn build_function_set(flags: FunctionFlags) -> Vec<AssistantFunction> {
    let mut functions = Vec::new();
    if flags.enable_index {
        functions.push(AssistantFunction::SearchOnIndexData);
    }
    if flags.enable_web {
        functions.push(AssistantFunction::SearchOnWeb);
    }
    if flags.enable_combined {
        functions.clear();
        functions.push(AssistantFunction::SearchOnWebAndIndexData);
    }
    functions
}
