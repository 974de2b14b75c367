use anyhow::Context;
use exam_integrity::{
    config::{get_config, init_config},
    models::answer::AnswerValue,
    models::question::Question,
    services::capability::{PageSignal, Shortcut},
    services::exam_runtime::{ActiveExam, ExamRuntime, MountView, PreExam},
    services::notices::{NoticeSink, SessionNotice},
    services::submission_coordinator::SubmitOutcome,
    ExamContext,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    init_config()?;
    let config = get_config();

    let assessment_id: Uuid = std::env::args()
        .nth(1)
        .context("usage: exam-client <assessment-id>")?
        .parse()
        .context("assessment id must be a UUID")?;

    let ctx = ExamContext::from_config(config)?;
    let paper = ctx.backend.fetch_assessment(assessment_id).await?;
    info!(%assessment_id, title = %paper.title, questions = paper.questions.len(), "Assessment loaded");

    let (notices, mut notice_rx) = NoticeSink::channel();
    let runtime = ExamRuntime::new(ctx);
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let exam = match runtime.mount(assessment_id, paper.questions.clone(), notices).await? {
        MountView::Cancelled(_) => {
            println!("This exam was cancelled after repeated integrity violations. Contact your instructor.");
            return Ok(());
        }
        MountView::Running(exam) => {
            println!("Resuming your exam session.");
            exam
        }
        MountView::PreExam(mut pre) => match wait_for_start(&mut pre, &mut input).await? {
            Some(exam) => exam,
            None => return Ok(()),
        },
    };

    print_questions(&paper.questions);
    println!("Time remaining: {}", format_remaining(exam.remaining()));

    let mut remaining = exam.subscribe_remaining();
    let mut timer_live = true;
    let mut submits: JoinSet<SubmitOutcome> = JoinSet::new();
    loop {
        tokio::select! {
            Some(notice) = notice_rx.recv() => {
                let finished = matches!(notice, SessionNotice::Finished { .. });
                print_notice(&notice);
                if finished {
                    break;
                }
            }
            changed = remaining.changed(), if timer_live => {
                if changed.is_err() {
                    timer_live = false;
                    continue;
                }
                let left = *remaining.borrow_and_update();
                if left.as_secs() % 60 == 0 || left.as_secs() <= 10 {
                    println!("Time remaining: {}", format_remaining(left));
                }
            }
            Some(joined) = submits.join_next() => {
                match joined {
                    Ok(outcome) => print_submit_outcome(outcome),
                    Err(e) => tracing::error!(error = %e, "Submit task failed"),
                }
            }
            line = input.next_line() => {
                match line? {
                    Some(line) => {
                        if !run_command(&exam, &mut submits, line.trim()) {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    exam.unmount();
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn wait_for_start(pre: &mut PreExam, input: &mut Input) -> anyhow::Result<Option<ActiveExam>> {
    if pre.consent_given() {
        println!("Type 'start' to begin the exam, or 'quit'.");
    } else {
        println!("This exam is proctored. Type 'consent' to agree and start, or 'quit'.");
    }
    while let Some(line) = input.next_line().await? {
        let consent = match line.trim() {
            "consent" => true,
            "start" => false,
            "quit" => return Ok(None),
            other => {
                println!("Unknown command: {}", other);
                continue;
            }
        };
        match pre.start(consent).await {
            Ok(exam) => return Ok(Some(exam)),
            Err(e) => println!("Could not start the exam: {}", e),
        }
    }
    Ok(None)
}

/// Returns false when the session loop should end. Submits run on `submits`
/// so the countdown and notices keep flowing while the request is out.
fn run_command(exam: &ActiveExam, submits: &mut JoinSet<SubmitOutcome>, line: &str) -> bool {
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    let signal = match command {
        "hide" => Some(PageSignal::VisibilityChanged { hidden: true }),
        "show" => Some(PageSignal::VisibilityChanged { hidden: false }),
        "blur" => Some(PageSignal::WindowBlur),
        "fs-exit" => Some(PageSignal::FullscreenChanged { active: false }),
        "copy" => Some(PageSignal::BlockedShortcut(Shortcut::Copy)),
        "paste" => match question_index(parts.next()) {
            Some(question_index) => Some(PageSignal::PasteIntoAnswer { question_index }),
            None => {
                println!("usage: paste <question-number>");
                return true;
            }
        },
        _ => None,
    };
    if let Some(signal) = signal {
        let outcome = exam.signal(&signal);
        tracing::debug!(?signal, ?outcome, "Page signal handled");
        return true;
    }

    match command {
        "answer" => {
            let (Some(index), Some(raw)) = (question_index(parts.next()), parts.next()) else {
                println!("usage: answer <question-number> <value>");
                return true;
            };
            if let Err(e) = exam.set_answer(index, Some(AnswerValue::parse_input(raw))) {
                println!("{}", e);
            }
            true
        }
        "submit" => {
            submits.spawn(exam.submit_task());
            true
        }
        "status" => {
            println!(
                "State {:?}, warnings {}, time remaining {}",
                exam.state(),
                exam.warnings(),
                format_remaining(exam.remaining())
            );
            true
        }
        "quit" => false,
        "" => true,
        other => {
            println!("Unknown command: {}", other);
            true
        }
    }
}

fn print_submit_outcome(outcome: SubmitOutcome) {
    match outcome {
        SubmitOutcome::Submitted(receipt) => println!("Submitted (receipt {}).", receipt.id),
        SubmitOutcome::Failed { message, .. } => println!("{}", message),
        other => println!("Submission not started: {:?}", other),
    }
}

fn question_index(raw: Option<&str>) -> Option<usize> {
    raw?.trim().parse::<usize>().ok()?.checked_sub(1)
}

fn print_questions(questions: &[Question]) {
    for (i, q) in questions.iter().enumerate() {
        println!("{}. {} ({} pts)", i + 1, q.question, q.points);
        for (j, option) in q.options.iter().enumerate() {
            println!("   [{}] {}", j, option);
        }
    }
}

fn print_notice(notice: &SessionNotice) {
    match notice {
        SessionNotice::Warning { count, max, incident, .. } => {
            println!("Warning {}/{}: {} detected.", count, max, incident);
        }
        SessionNotice::CapabilityUnavailable { capability, message } => {
            println!("Note: {} unavailable ({}).", capability, message);
        }
        SessionNotice::Submitting { message, .. } => println!("{}", message),
        SessionNotice::SubmissionFailed { message, .. } => {
            println!("Submission failed: {} Type 'submit' to retry.", message);
        }
        SessionNotice::Finished { outcome } => println!("Exam finished: {:?}", outcome),
    }
}

fn format_remaining(left: Duration) -> String {
    let secs = left.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
