// Markdown export of a generated user story

use std::fmt::Write;

use crate::models::UserStoryResponse;

fn numbered_section(out: &mut String, title: &str, items: &[String]) {
    let _ = write!(out, "## {}\n\n", title);
    for (i, item) in items.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, item);
    }
    out.push('\n');
}

fn bullets(out: &mut String, items: &[String]) {
    for item in items {
        let _ = writeln!(out, "- {}", item);
    }
}

/// Render a story the way users paste it into trackers and docs
pub fn story_to_markdown(story: &UserStoryResponse) -> String {
    let mut out = String::new();

    let _ = write!(out, "# User Story\n\n{}\n\n", story.story);
    let _ = write!(out, "## Value Statement\n\n{}\n\n", story.value_statement);

    numbered_section(&mut out, "Use Case Examples", &story.use_case_examples);
    numbered_section(&mut out, "Acceptance Criteria", &story.acceptance_criteria);
    numbered_section(&mut out, "Functional Requirements", &story.functional_requirements);
    numbered_section(
        &mut out,
        "Non-Functional Requirements",
        &story.non_functional_requirements,
    );

    out.push_str("## Error Scenarios\n\n");
    for (i, scenario) in story.error_scenarios.iter().enumerate() {
        let _ = write!(
            out,
            "### {}. {}\n- {}\n\n",
            i + 1,
            scenario.scenario,
            scenario.message
        );
    }

    numbered_section(
        &mut out,
        "Technical Considerations",
        &story.technical_considerations,
    );

    out.push_str("## Test Cases\n\n");
    for (i, test) in story.test_cases.iter().enumerate() {
        let _ = write!(
            out,
            "### {}. {}\n**Scenario:** {}\n\n**Given:**\n",
            i + 1,
            test.title,
            test.scenario
        );
        bullets(&mut out, &test.given);
        out.push_str("\n**When:**\n");
        bullets(&mut out, &test.when);
        out.push_str("\n**Then:**\n");
        bullets(&mut out, &test.then);
        out.push('\n');
    }

    if !story.api_specs.is_empty() {
        out.push_str("## API Specifications\n\n");
        for (i, spec) in story.api_specs.iter().enumerate() {
            let _ = write!(
                out,
                "### {}. {} {}\n{}\n\n",
                i + 1,
                spec.method,
                spec.endpoint,
                spec.description
            );
        }
    }

    let _ = write!(
        out,
        "## Metadata\n\n- Priority: {}\n- Effort Estimate: {}\n",
        story.priority, story.effort_estimate
    );

    out
}
