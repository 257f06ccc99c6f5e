use crate::corpus::Chunk;
use crate::models::TrialRecord;
use std::fmt::Write;

pub const MISSING: &str = "N/D";

/// Certainty bar the prefilter prompt asks the model to apply.
pub const PREFILTER_RELEVANCE_BAR: f64 = 0.5;

/// Number of matches the final prompt asks for.
pub const FINAL_TOP_N: usize = 5;

pub fn user_prompt(query: &str) -> String {
    format!(
        "Use information from the following user prompt to construct the proper JSON output: {}",
        query.trim()
    )
}

pub fn prefilter_role(chunk_text: &str) -> String {
    format!(
        "You are a medical assistant API specialized in health clinical trials that returns only JSON outputs.\n\
         Return a JSON array inside a ```json fenced code block, where every element follows this schema \
         (clear of any escape characters):\n\
         {{\"database_index\": \"integer (the index of the trial in the database)\", \
         \"certainty\": \"float (the probability of the trial being relevant to the prompt)\"}}.\n\
         Your job is to analyse a user prompt for its clinical context and, from the provided database, \
         return the best matches (certainty above {PREFILTER_RELEVANCE_BAR}), where possible, of eligible \
         clinical trials in JSON format ONLY for that context. Return an empty array when nothing matches.\n\
         The Clinical Trial Database:\n{chunk_text}"
    )
}

pub fn final_role(context_text: &str) -> String {
    format!(
        "You are a medical assistant API specialized in health clinical trials that returns only JSON outputs.\n\
         Your job is to analyse a user prompt with a clinical context and, from the provided database, \
         return the top {FINAL_TOP_N} matches of eligible clinical trials in JSON format for that context.\n\
         Return a JSON array inside a ```json fenced code block, where every element follows this schema \
         (clear of any escape characters):\n\
         {{\"database_index\": \"integer (the index of the trial in the database)\", \
         \"certainty\": \"float (the probability of the trial being relevant to the prompt)\", \
         \"title\": \"string (the title of the trial)\"}}.\n\
         Be aware of the inclusion and exclusion criteria of the trials when calculating certainty.\n\
         The Clinical Trial Database details:\n{context_text}"
    )
}

/// Id and title only, to keep the prefilter token cost low.
pub fn render_chunk(chunk: &Chunk<'_, '_>) -> String {
    let mut text = String::from("List of clinical trials to be filtered by context:\n");
    for record in chunk.rows {
        let _ = writeln!(
            text,
            "- id: {}, Title: {}",
            record.row_id,
            text_or_missing(record.title.as_deref())
        );
    }
    text
}

pub fn render_context(rows: &[&TrialRecord]) -> String {
    let mut text = String::from("Short list of clinical trials:\n");
    for record in rows {
        let _ = writeln!(
            text,
            "- id: {}, Title: {}, Therapeutic area: {}, Keywords: {}, Inclusion: {}, Exclusion: {}",
            record.row_id,
            text_or_missing(record.title.as_deref()),
            list_or_missing(record.therapeutic_area.as_deref()),
            list_or_missing(record.keywords.as_deref()),
            list_or_missing(record.inclusion_criteria.as_deref()),
            list_or_missing(record.exclusion_criteria.as_deref()),
        );
    }
    text
}

fn text_or_missing(value: Option<&str>) -> String {
    match value.map(collapse_whitespace) {
        Some(text) if !text.is_empty() => text,
        _ => MISSING.to_string(),
    }
}

fn list_or_missing(values: Option<&[String]>) -> String {
    let joined = values
        .unwrap_or_default()
        .iter()
        .map(|value| collapse_whitespace(value))
        .filter(|value| !value.is_empty())
        .collect::<Vec<_>>()
        .join("; ");

    if joined.is_empty() {
        MISSING.to_string()
    } else {
        joined
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Corpus;
    use crate::models::SamplingStrategy;

    #[test]
    fn chunk_rendering_lists_id_and_title_only() {
        let mut with_details = TrialRecord::new(0, "A");
        with_details.keywords = Some(vec!["secret keyword".to_string()]);
        let mut untitled = TrialRecord::new(1, "");
        untitled.title = None;
        let corpus = Corpus::new(vec![with_details, untitled]).unwrap();
        let view = corpus.order(SamplingStrategy::Natural, 123);

        let text = render_chunk(&view.window(0, 2));
        assert_eq!(
            text,
            "List of clinical trials to be filtered by context:\n- id: 0, Title: A\n- id: 1, Title: N/D\n"
        );
        assert!(!text.contains("secret keyword"));
    }

    #[test]
    fn context_rendering_includes_enriched_fields() {
        let mut record = TrialRecord::new(7, "Pediatric\n asthma   study");
        record.therapeutic_area = Some(vec!["Respiratory".to_string(), "Pediatrics".to_string()]);
        record.inclusion_criteria = Some(vec!["Age 6-12".to_string()]);
        record.exclusion_criteria = Some(vec!["  ".to_string()]);

        let text = render_context(&[&record]);
        assert!(text.contains("- id: 7, Title: Pediatric asthma study"));
        assert!(text.contains("Therapeutic area: Respiratory; Pediatrics"));
        assert!(text.contains("Keywords: N/D"));
        assert!(text.contains("Inclusion: Age 6-12"));
        assert!(text.contains("Exclusion: N/D"));
    }

    #[test]
    fn role_templates_embed_their_inputs() {
        let prefilter = prefilter_role("- id: 3, Title: X");
        assert!(prefilter.contains("\"database_index\""));
        assert!(prefilter.contains("\"certainty\""));
        assert!(prefilter.contains("above 0.5"));
        assert!(prefilter.ends_with("- id: 3, Title: X"));

        let final_text = final_role("CONTEXT");
        assert!(final_text.contains("top 5"));
        assert!(final_text.contains("\"title\""));
        assert!(final_text.contains("inclusion and exclusion criteria"));
        assert!(final_text.ends_with("CONTEXT"));
    }

    #[test]
    fn user_prompt_wraps_trimmed_query() {
        let text = user_prompt("  adult with type 2 diabetes \n");
        assert!(text.ends_with(": adult with type 2 diabetes"));
        assert!(text.contains("JSON output"));
    }
}
