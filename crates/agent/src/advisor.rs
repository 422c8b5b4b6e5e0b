//! Advisory text: static guidance for the whole run and the per-turn nudge.
//!
//! Everything here is a pure function of its inputs. The advisor suggests;
//! it never validates a category and never narrows the tool set.

use coact_core::backend::PlannedStep;
use coact_core::category::CategoryRegistry;
use coact_core::tool::ToolRegistry;

use crate::trace::TraceStep;

/// Render the category catalog as a guidance section.
pub fn build_guidance(registry: &CategoryRegistry) -> String {
    let mut lines = vec![
        "## Action Categories".to_string(),
        String::new(),
        "Label every turn with the category that best describes what you are doing. \
         This catalog is a guide, not a rulebook: any label is accepted, including ones \
         not listed here."
            .to_string(),
        String::new(),
    ];

    if registry.is_empty() {
        lines.push("No categories are registered. Use any label that describes your action.".into());
    }

    for category in registry.all() {
        let tools = if category.tool_affinity.is_empty() {
            String::new()
        } else {
            format!(
                " (common tools: {}; informational only, every tool is always available)",
                category.tool_affinity.join(", ")
            )
        };
        let next = if category.suggested_next.is_empty() {
            " (terminal)".to_string()
        } else {
            format!(" → suggested next: [{}]", category.suggested_next.join(", "))
        };
        lines.push(format!(
            "- **{}**: {}{}{}",
            category.name, category.description, tools, next
        ));
    }

    lines.join("\n")
}

/// Full session-start instructions: catalog, tools, and the ground rules.
pub fn build_system_prompt(
    registry: &CategoryRegistry,
    tools: &ToolRegistry,
    done_category: &str,
) -> String {
    let mut tool_lines = vec!["## Available Tools".to_string(), String::new()];
    if tools.is_empty() {
        tool_lines.push("No tools available.".into());
    } else {
        for def in tools.definitions() {
            tool_lines.push(format!("- **{}**: {}", def.name, def.description));
        }
    }

    format!(
        "You are solving a task step by step. At each step, choose a category \
         that best describes what you are doing.\n\n\
         {guidance}\n\n\
         {tools}\n\n\
         ## How It Works\n\
         1. Self-classify every turn by setting `category` to any category from the catalog \
         (or invent a new one if none fits).\n\
         2. All tools are always available. Use whichever you need.\n\
         3. Recommendations are suggestions only. You have full agency.\n\
         4. Set `is_done: true` when the task is complete (or use the category `{done_category}`).\n",
        guidance = build_guidance(registry),
        tools = tool_lines.join("\n"),
    )
}

/// Suggestions for the turn after `last_category`.
///
/// No prior turn, or a category the registry does not know, yields an empty
/// list: the advisor has no opinion rather than an error.
pub fn recommend(registry: &CategoryRegistry, last_category: Option<&str>) -> Vec<String> {
    last_category
        .and_then(|name| registry.get(name))
        .map(|category| category.suggested_next.clone())
        .unwrap_or_default()
}

/// The natural-language nudge injected into the next request.
pub fn format_turn_message(last_category: Option<&str>, suggestions: &[String]) -> String {
    match last_category {
        None => "This is your first turn. Choose whichever action best moves the task forward."
            .to_string(),
        Some(last) if suggestions.is_empty() => format!("Your last action was [{last}]."),
        Some(last) => format!(
            "Your last action was [{last}]. Recommended next: [{}].",
            suggestions.join(", ")
        ),
    }
}

/// A note when the last `threshold` steps all share one category.
///
/// `threshold` of 0 or 1 disables the note.
pub fn repetition_note(steps: &[TraceStep], threshold: usize) -> Option<String> {
    if threshold < 2 || steps.len() < threshold {
        return None;
    }
    let recent = &steps[steps.len() - threshold..];
    let first = &recent[0].category;
    if recent.iter().all(|s| &s.category == first) {
        Some(format!(
            "You've done {threshold} consecutive [{first}] actions. \
             Consider moving to a different action type."
        ))
    } else {
        None
    }
}

/// Instructions for the optional plan request sent before the first turn.
pub fn plan_message() -> String {
    "Before acting, outline a plan: an ordered list of the categories you expect to use, \
     one entry per turn, each with a short description of what you will do. \
     The plan is a guide for you, not a contract. You may deviate at any time."
        .to_string()
}

/// JSON schema of the plan reply. Categories are free-form, as in turns.
pub fn plan_schema(registry: &CategoryRegistry) -> serde_json::Value {
    let known = registry.names().join(", ");
    serde_json::json!({
        "type": "object",
        "properties": {
            "plan": {
                "type": "array",
                "description": format!(
                    "Ordered steps, one per turn. Known categories: {known}. \
                     Custom categories are allowed."
                ),
                "items": {
                    "type": "object",
                    "properties": {
                        "category": { "type": "string" },
                        "description": { "type": "string" },
                    },
                    "required": ["category", "description"],
                },
            },
        },
        "required": ["plan"],
    })
}

/// Where the run stands in its plan, for the turn at `position`.
/// `None` without a plan or once the plan is used up.
pub fn format_plan_position(plan: &[PlannedStep], position: usize) -> Option<String> {
    let entry = plan.get(position)?;
    let mut line = format!(
        "Plan step {} of {}: [{}]",
        position + 1,
        plan.len(),
        entry.category
    );
    if !entry.description.is_empty() {
        line.push(' ');
        line.push_str(&entry.description);
    }
    Some(line)
}

/// JSON schema of the structured reply expected from the agent.
///
/// Category and tool names are listed in descriptions only; neither is an
/// enum, so nothing the agent picks can fail validation.
pub fn response_schema(registry: &CategoryRegistry, tools: &ToolRegistry) -> serde_json::Value {
    let known = registry.names().join(", ");
    let tool_names = tools.names().join(", ");

    serde_json::json!({
        "type": "object",
        "properties": {
            "category": {
                "type": "string",
                "description": format!(
                    "The category of action you are performing. Known categories: {known}. \
                     You may also use a custom category if none fit."
                ),
            },
            "thinking": {
                "type": "string",
                "description": "Your internal reasoning about what to do.",
            },
            "content": {
                "type": "string",
                "description": "Your response text or the result of your work.",
            },
            "tool_calls": {
                "type": "array",
                "description": format!("Tools to run this turn. Available: {tool_names}"),
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "arguments": { "type": "object" },
                    },
                    "required": ["name"],
                },
            },
            "is_done": {
                "type": "boolean",
                "description": "Set to true when the task is fully complete.",
            },
        },
        "required": ["category", "content", "is_done"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use coact_core::category::{Category, default_catalog};

    fn abc() -> CategoryRegistry {
        CategoryRegistry::from_categories([
            Category::new("A", "first").with_next(["B"]),
            Category::new("B", "second").with_next(["A", "C"]),
            Category::new("C", "last"),
        ])
        .unwrap()
    }

    #[test]
    fn recommend_known_unknown_and_none() {
        let registry = abc();
        assert_eq!(recommend(&registry, Some("B")), vec!["A", "C"]);
        assert!(recommend(&registry, Some("C")).is_empty());
        assert!(recommend(&registry, Some("improvise")).is_empty());
        assert!(recommend(&registry, None).is_empty());
    }

    #[test]
    fn turn_message_variants() {
        let opening = format_turn_message(None, &[]);
        assert!(opening.contains("first turn"));

        let nudge = format_turn_message(Some("A"), &["B".to_string(), "C".to_string()]);
        assert_eq!(nudge, "Your last action was [A]. Recommended next: [B, C].");

        let bare = format_turn_message(Some("improvise"), &[]);
        assert_eq!(bare, "Your last action was [improvise].");
    }

    #[test]
    fn guidance_lists_every_category_in_order() {
        let guidance = build_guidance(&default_catalog());
        let analyze = guidance.find("**analyze**").unwrap();
        let done = guidance.find("**done**").unwrap();
        assert!(analyze < done);
        assert!(guidance.contains("suggested next: [plan, compute]"));
        assert!(guidance.contains("common tools: calc, compound, stats"));
        assert!(guidance.contains("every tool is always available"));
        assert!(guidance.contains("(terminal)"));
    }

    #[test]
    fn guidance_for_empty_registry() {
        let guidance = build_guidance(&CategoryRegistry::new());
        assert!(guidance.contains("No categories are registered"));
    }

    #[test]
    fn system_prompt_includes_tools_and_done_category() {
        let mut tools = ToolRegistry::new();
        tools.register_fn("calc", "Evaluate arithmetic", |_| Ok(String::new()));
        let prompt = build_system_prompt(&abc(), &tools, "finish");
        assert!(prompt.contains("- **calc**: Evaluate arithmetic"));
        assert!(prompt.contains("category `finish`"));
        assert!(prompt.contains("## Action Categories"));

        let bare = build_system_prompt(&abc(), &ToolRegistry::new(), "done");
        assert!(bare.contains("No tools available."));
    }

    #[test]
    fn repetition_note_after_identical_run() {
        let steps: Vec<_> = (0..3).map(|t| TraceStep::new(t, "compute", vec![])).collect();
        let note = repetition_note(&steps, 3).unwrap();
        assert!(note.contains("3 consecutive [compute]"));

        assert!(repetition_note(&steps[..2], 3).is_none());
        assert!(repetition_note(&steps, 0).is_none());

        let mixed = vec![
            TraceStep::new(0, "compute", vec![]),
            TraceStep::new(1, "verify", vec![]),
            TraceStep::new(2, "compute", vec![]),
        ];
        assert!(repetition_note(&mixed, 3).is_none());
    }

    #[test]
    fn schema_lists_names_without_enums() {
        let mut tools = ToolRegistry::new();
        tools.register_fn("stats", "", |_| Ok(String::new()));
        let schema = response_schema(&abc(), &tools);
        let category = &schema["properties"]["category"];
        assert!(category["description"].as_str().unwrap().contains("A, B, C"));
        assert!(category.get("enum").is_none());
        assert!(
            schema["properties"]["tool_calls"]["description"]
                .as_str()
                .unwrap()
                .contains("stats")
        );
    }

    #[test]
    fn plan_schema_shape() {
        let schema = plan_schema(&abc());
        assert_eq!(schema["required"], serde_json::json!(["plan"]));
        let plan = &schema["properties"]["plan"];
        assert_eq!(plan["type"], "array");
        assert!(plan["description"].as_str().unwrap().contains("A, B, C"));
        assert_eq!(
            plan["items"]["required"],
            serde_json::json!(["category", "description"])
        );
        assert!(plan["items"]["properties"]["category"].get("enum").is_none());
        assert!(plan_message().contains("not a contract"));
    }

    #[test]
    fn plan_position_lines() {
        let plan = vec![
            PlannedStep::new("analyze", "read the data"),
            PlannedStep::new("compute", ""),
        ];
        assert_eq!(
            format_plan_position(&plan, 0).unwrap(),
            "Plan step 1 of 2: [analyze] read the data"
        );
        assert_eq!(format_plan_position(&plan, 1).unwrap(), "Plan step 2 of 2: [compute]");
        assert!(format_plan_position(&plan, 2).is_none());
        assert!(format_plan_position(&[], 0).is_none());
    }
}
