use crate::quiz::{export_json, Letter, Level, QuizItem, MAX_QUESTIONS, MIN_QUESTIONS};

const DEFAULT_TOPIC: &str = "the requested topic";

const BASE_OPTIONS: [&str; 4] = ["True", "False", "Depends on context", "Don't know"];

fn question_template(index: usize, topic: &str) -> String {
    match index % 5 {
        0 => format!("Regarding {}, which statement is correct?", topic),
        1 => format!("In {}, what is the best choice?", topic),
        2 => format!("About {}, what does the main concept mean?", topic),
        3 => format!("Which option best describes {}?", topic),
        _ => format!("In the context of {}, which answer is accurate?", topic),
    }
}

/// A placeholder quiz built without any model.
///
/// Always `count` items (clamped to 1..=10). The option texts rotate from one
/// question to the next but the key is always `A`, so the "right" answer is a
/// position, not a fact. Fine for an offline stand-in; do not grade anything
/// that matters with it.
pub fn synthesize(topic: &str, level: &Level, count: usize) -> Vec<QuizItem> {
    let topic = match topic.trim() {
        "" => DEFAULT_TOPIC,
        topic => topic,
    };
    let level = level.to_string().trim().to_lowercase();
    let count = count.clamp(MIN_QUESTIONS, MAX_QUESTIONS);

    (0..count)
        .map(|i| {
            let mut bodies = BASE_OPTIONS;
            bodies.rotate_left(i % 4);
            let options = Letter::ALL.map(|letter| format!("{}{}", letter.marker(), bodies[letter.index()]));

            QuizItem::new(
                format!("{} (level {})", question_template(i, topic), level),
                options,
                Letter::A,
                Some(format!("Indicative answer for {}.", topic)),
            )
        })
        .collect()
}

/// The fallback quiz in the same indented JSON a real generation is exported as.
pub fn synthesize_json(topic: &str, level: &Level, count: usize) -> serde_json::Result<String> {
    export_json(&synthesize(topic, level, count))
}
