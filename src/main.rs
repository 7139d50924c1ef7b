mod config;
mod quiz;

use std::sync::Arc;

use config::Settings;
use dotenv::dotenv;
use quiz::{
    engine::ChatGptLoader,
    explanation::ExplanationRequester,
    gateway::TextGenerationGateway,
    generator::{QuizGenerator, QuizOrigin},
    session::{ExplanationSlot, QuizSession},
    GenerationRequest, Letter, Level, QuizItem,
};
use teloxide::{
    dispatching::{dialogue, dialogue::InMemStorage, UpdateHandler},
    prelude::*,
    types::{ChatAction, InputFile, KeyboardButton, KeyboardMarkup, KeyboardRemove},
    utils::command::BotCommands,
};

type QuizDialogue = Dialogue<State, InMemStorage<State>>;
type HandlerError = Box<dyn std::error::Error + Send + Sync>;
type HandlerResult = Result<(), HandlerError>;

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveTopic,
    ReceiveLevel {
        topic: String,
    },
    ReceiveCount {
        topic: String,
        level: Level,
    },
    ReceiveContext {
        topic: String,
        level: Level,
        count: usize,
    },
    Answering {
        session: QuizSession,
        question_number: usize,
    },
    Finished {
        session: QuizSession,
    },
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
enum Command {
    #[command(description = "start a new quiz.")]
    Start,
    #[command(description = "show this text.")]
    Help,
    #[command(description = "drop the current quiz.")]
    Cancel,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    pretty_env_logger::init();
    log::info!("Starting quiz bot...");

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            log::error!("Invalid configuration: {}", err);
            std::process::exit(1);
        }
    };
    if settings.api_key.is_none() {
        log::warn!("CHATGPT_API_KEY is not set, every quiz will be generated offline");
    }

    let bot = Bot::from_env();

    let gateway = Arc::new(TextGenerationGateway::new(ChatGptLoader::new(settings.clone())));
    let generator = Arc::new(QuizGenerator::new(gateway.clone(), settings.policy));
    let explainer = Arc::new(ExplanationRequester::new(gateway));
    log::info!("Validation policy: {:?}", generator.policy());

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![InMemStorage::<State>::new(), generator, explainer])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<HandlerError> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Start].endpoint(start))
        .branch(case![Command::Help].endpoint(help))
        .branch(case![Command::Cancel].endpoint(cancel));

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(case![State::Start].endpoint(start))
        .branch(case![State::ReceiveTopic].endpoint(receive_topic))
        .branch(case![State::ReceiveLevel { topic }].endpoint(receive_level))
        .branch(case![State::ReceiveCount { topic, level }].endpoint(receive_count))
        .branch(case![State::ReceiveContext { topic, level, count }].endpoint(receive_context))
        .branch(case![State::Answering { session, question_number }].endpoint(receive_answer))
        .branch(case![State::Finished { session }].endpoint(finished_menu));

    dialogue::enter::<Update, InMemStorage<State>, State, _>().branch(message_handler)
}

const GREETING_TEXT: &str =
    "Hi! I build multiple-choice quizzes on any topic. What should the quiz be about?";

async fn start(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, GREETING_TEXT)
        .reply_markup(KeyboardRemove::new())
        .await?;

    dialogue.update(State::ReceiveTopic).await?;
    Ok(())
}

async fn help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

async fn cancel(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, "Quiz dropped. Send /start to begin again.")
        .reply_markup(KeyboardRemove::new())
        .await?;
    dialogue.exit().await?;
    Ok(())
}

async fn receive_topic(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    let topic = match msg.text().map(str::trim) {
        Some(topic) if topic.chars().count() >= 2 => topic.to_string(),
        _ => {
            bot.send_message(msg.chat.id, "Please send the topic as text (at least 2 characters)")
                .await?;
            return Ok(());
        }
    };

    let keyboard = KeyboardMarkup::new(vec![vec![
        KeyboardButton::new("Beginner"),
        KeyboardButton::new("Intermediate"),
        KeyboardButton::new("Advanced"),
    ]]);
    bot.send_message(msg.chat.id, "Which level?")
        .reply_markup(keyboard)
        .await?;

    dialogue.update(State::ReceiveLevel { topic }).await?;
    Ok(())
}

async fn receive_level(
    bot: Bot,
    dialogue: QuizDialogue,
    topic: String,
    msg: Message,
) -> HandlerResult {
    let level = match msg.text().map(str::trim) {
        Some(level) if !level.is_empty() => Level::parse(level),
        _ => {
            bot.send_message(msg.chat.id, "Please choose a level").await?;
            return Ok(());
        }
    };

    let keyboard = KeyboardMarkup::new(vec![vec![
        KeyboardButton::new("3"),
        KeyboardButton::new("5"),
        KeyboardButton::new("10"),
    ]]);
    bot.send_message(msg.chat.id, "How many questions? (1 to 10)")
        .reply_markup(keyboard)
        .await?;

    dialogue.update(State::ReceiveCount { topic, level }).await?;
    Ok(())
}

async fn receive_count(
    bot: Bot,
    dialogue: QuizDialogue,
    (topic, level): (String, Level),
    msg: Message,
) -> HandlerResult {
    let Some(amount) = msg.text().and_then(|text| text.trim().parse::<usize>().ok()) else {
        bot.send_message(msg.chat.id, "Please send a number").await?;
        return Ok(());
    };

    let request = match GenerationRequest::new(topic, level, amount, "") {
        Ok(request) => request,
        Err(err) => {
            bot.send_message(msg.chat.id, err.to_string()).await?;
            return Ok(());
        }
    };

    bot.send_message(msg.chat.id, CONTEXT_PROMPT)
        .reply_markup(skip_keyboard())
        .await?;

    dialogue
        .update(State::ReceiveContext {
            topic: request.topic,
            level: request.level,
            count: request.count,
        })
        .await?;
    Ok(())
}

const SKIP_BUTTON: &str = "Skip";
const CONTEXT_PROMPT: &str =
    "Send some material to base the questions on (lesson notes, a paragraph of text), or tap Skip.";

async fn receive_context(
    bot: Bot,
    dialogue: QuizDialogue,
    (topic, level, count): (String, Level, usize),
    generator: Arc<QuizGenerator>,
    msg: Message,
) -> HandlerResult {
    let Some(text) = msg.text() else {
        bot.send_message(msg.chat.id, CONTEXT_PROMPT)
            .reply_markup(skip_keyboard())
            .await?;
        return Ok(());
    };

    let request = GenerationRequest::new(topic, level, count, context_from(text))?;

    // Nice to have; the quiz still comes if this fails.
    let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;

    let mut session = QuizSession::new();
    let ticket = session.begin_generation();
    let outcome = generator.generate(&request).await;
    session.complete_generation(ticket, outcome);
    log::debug!("Raw quiz text for chat {}: {}", msg.chat.id.0, session.raw_text());

    if let Some(error) = session.error() {
        bot.send_message(
            msg.chat.id,
            format!("{}\nSend more material to guide the questions, or tap Skip to retry.", error),
        )
        .reply_markup(skip_keyboard())
        .await?;
        return Ok(());
    }

    if let Some(QuizOrigin::Fallback(reason)) = session.origin() {
        log::info!("Serving offline quiz to chat {} ({:?})", msg.chat.id.0, reason);
        bot.send_message(
            msg.chat.id,
            "The model could not help this time, so here is an offline practice quiz.",
        )
        .await?;
    }

    send_question(&bot, msg.chat.id, &session, 0).await?;
    dialogue
        .update(State::Answering {
            session,
            question_number: 0,
        })
        .await?;
    Ok(())
}

async fn receive_answer(
    bot: Bot,
    dialogue: QuizDialogue,
    (mut session, question_number): (QuizSession, usize),
    msg: Message,
) -> HandlerResult {
    let Some(letter) = msg.text().and_then(parse_pick) else {
        bot.send_message(msg.chat.id, "Please pick one of the options (A, B, C or D)")
            .await?;
        return Ok(());
    };

    if let Err(err) = session.select(question_number, letter) {
        bot.send_message(msg.chat.id, err.to_string()).await?;
        return Ok(());
    }

    let next = question_number + 1;
    if next < session.quiz().len() {
        send_question(&bot, msg.chat.id, &session, next).await?;
        dialogue
            .update(State::Answering {
                session,
                question_number: next,
            })
            .await?;
        return Ok(());
    }

    let result = session.grade();
    let summary = format!(
        "Quiz finished! You answered {} of {} questions correctly.\n\n{}",
        result.correct_count,
        result.total,
        review(&session)
    );
    bot.send_message(msg.chat.id, summary)
        .reply_markup(menu_keyboard())
        .await?;

    dialogue.update(State::Finished { session }).await?;
    Ok(())
}

const EXPLAIN_BUTTON: &str = "Explain my answers";
const EXPORT_BUTTON: &str = "Export JSON";
const NEW_QUIZ_BUTTON: &str = "New quiz";

async fn finished_menu(
    bot: Bot,
    dialogue: QuizDialogue,
    mut session: QuizSession,
    explainer: Arc<ExplanationRequester>,
    msg: Message,
) -> HandlerResult {
    match msg.text() {
        Some(EXPLAIN_BUTTON) => {
            let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;

            let items = session.quiz().to_vec();
            let answers = session.answers().clone();
            let tickets: Vec<_> = (0..items.len())
                .filter_map(|index| session.begin_explanation(index))
                .collect();

            explainer
                .explain_all(&items, &answers, |index, text| {
                    session.fill_explanation(tickets[index], text);
                })
                .await;

            for (index, item) in items.iter().enumerate() {
                if let Some(ExplanationSlot::Ready(text)) = session.explanation(index) {
                    bot.send_message(
                        msg.chat.id,
                        format!("{}. {}\n\n{}", index + 1, item.question, text),
                    )
                    .await?;
                }
            }
            bot.send_message(msg.chat.id, "What next?")
                .reply_markup(menu_keyboard())
                .await?;
            dialogue.update(State::Finished { session }).await?;
        }
        Some(EXPORT_BUTTON) => {
            let json = session.export_json()?;
            bot.send_document(msg.chat.id, InputFile::memory(json.into_bytes()).file_name("quiz.json"))
                .await?;
        }
        Some(NEW_QUIZ_BUTTON) => {
            bot.send_message(msg.chat.id, "What should the next quiz be about?")
                .reply_markup(KeyboardRemove::new())
                .await?;
            dialogue.update(State::ReceiveTopic).await?;
        }
        _ => {
            bot.send_message(msg.chat.id, "Please choose one of the options")
                .reply_markup(menu_keyboard())
                .await?;
        }
    }
    Ok(())
}

async fn send_question(
    bot: &Bot,
    chat_id: ChatId,
    session: &QuizSession,
    number: usize,
) -> HandlerResult {
    let Some(question) = session.quiz().get(number) else {
        return Ok(());
    };

    let text = format!(
        "Question {}/{}:\n{}\n\n{}",
        number + 1,
        session.quiz().len(),
        question.question,
        question.options.join("\n")
    );
    bot.send_message(chat_id, text)
        .reply_markup(KeyboardMarkup::new(
            question
                .options
                .iter()
                .map(|option| vec![KeyboardButton::new(option.clone())])
                .collect::<Vec<_>>(),
        ))
        .await?;
    Ok(())
}

fn skip_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![KeyboardButton::new(SKIP_BUTTON)]])
}

/// The material a student typed, or nothing when they tapped Skip.
fn context_from(text: &str) -> String {
    let text = text.trim();
    if text.eq_ignore_ascii_case(SKIP_BUTTON) {
        String::new()
    } else {
        text.to_string()
    }
}

fn menu_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(EXPLAIN_BUTTON)],
        vec![
            KeyboardButton::new(EXPORT_BUTTON),
            KeyboardButton::new(NEW_QUIZ_BUTTON),
        ],
    ])
}

/// Accepts a bare letter or a full option such as `"B) Mitochondria"`.
fn parse_pick(text: &str) -> Option<Letter> {
    let text = text.trim();
    let mut chars = text.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let rest = chars.as_str();
    if !rest.is_empty() && !rest.starts_with(')') {
        return None;
    }
    Letter::parse(&letter.to_string())
}

fn review(session: &QuizSession) -> String {
    session
        .quiz()
        .iter()
        .enumerate()
        .map(|(index, item)| review_line(index, item, session.answers().get(&index).copied()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn review_line(index: usize, item: &QuizItem, pick: Option<Letter>) -> String {
    let mark = if pick == Some(item.answer) { "✅" } else { "❌" };
    let yours = pick
        .map(|letter| item.option_for(letter).to_string())
        .unwrap_or_else(|| "no answer".to_string());
    format!(
        "{} {}. {}\n    yours: {} | correct: {}",
        mark,
        index + 1,
        item.question,
        yours,
        item.correct_option()
    )
}
