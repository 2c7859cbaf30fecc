//! A streaming LLM assistant for the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Ask a question
//! quill "what is the capital of France?"
//!
//! # Generate a shell command, then execute or describe it
//! quill --shell "find all rust files modified today"
//!
//! # Pipe context in
//! git diff | quill "write a commit message for this diff"
//!
//! # Continue a conversation across invocations
//! quill --chat work "remember the number 4"
//! quill --chat work "what number did I ask you to remember?"
//!
//! # Interactive session
//! quill --repl temp
//! ```

use std::io::IsTerminal;
use std::sync::Arc;

use arrrg::CommandLine;
use arrrg_derive::CommandLine;
use crossterm::terminal;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use quill::chat_store::ChatStore;
use quill::handler::{compose_prompt, line_editor, list_ids, read_piped, show_messages};
use quill::{
    Cache, ChatHandler, CompletionEngine, CompletionOptions, Config, DefaultHandler, DefaultRole,
    Error, FunctionRegistry, Interrupt, MarkdownPrinter, Printer, ReplHandler, Result,
    ShellAction, ShellEnv, SystemRole, TextPrinter, VendorAdapter, debug_panels,
};

const FALLBACK_WIDTH: u16 = 80;

/// Command-line arguments for quill.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
struct Args {
    #[arrrg(optional, "Large language model to use", "MODEL")]
    model: Option<String>,

    #[arrrg(
        optional,
        "Randomness of generated output, 0.0 to 2.0 (default: 0.0)",
        "TEMP"
    )]
    temperature: Option<String>,

    #[arrrg(
        optional,
        "Limits highest probable tokens, 0.0 to 1.0 (default: 1.0)",
        "TOP_P"
    )]
    top_p: Option<String>,

    #[arrrg(flag, "Prettify markdown output")]
    md: bool,

    #[arrrg(flag, "Print markdown output verbatim")]
    no_md: bool,

    #[arrrg(flag, "Generate and execute shell commands")]
    shell: bool,

    #[arrrg(flag, "Describe a shell command")]
    describe_shell: bool,

    #[arrrg(flag, "Generate only code")]
    code: bool,

    #[arrrg(flag, "Allow function calls")]
    functions: bool,

    #[arrrg(flag, "Disallow function calls")]
    no_functions: bool,

    #[arrrg(flag, "Ask what to do with a generated shell command")]
    interaction: bool,

    #[arrrg(flag, "Print a generated shell command and exit")]
    no_interaction: bool,

    #[arrrg(flag, "Do not read or write the response cache")]
    no_cache: bool,

    #[arrrg(
        optional,
        "Follow the conversation with this id; use \"temp\" for a quick session",
        "ID"
    )]
    chat: Option<String>,

    #[arrrg(optional, "Start an interactive session in the chat with this id", "ID")]
    repl: Option<String>,

    #[arrrg(optional, "Show all messages of the chat with this id", "ID")]
    show_chat: Option<String>,

    #[arrrg(flag, "List all existing chat ids")]
    list_chats: bool,

    #[arrrg(optional, "System role to use", "NAME")]
    role: Option<String>,

    #[arrrg(flag, "Show the prompts sent and log debugging output to stderr")]
    verbose: bool,

    #[arrrg(flag, "Show the version and exit")]
    version: bool,
}

#[tokio::main]
async fn main() {
    let (args, free) = Args::from_command_line_relaxed("quill [OPTIONS] [PROMPT...]");
    init_tracing(args.verbose);
    if args.version {
        println!("quill {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    if let Err(err) = run(args, free).await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("warn,quill=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Pick between a flag and its negation, falling back to `default`.
fn toggle(on: bool, off: bool, name: &str, default: bool) -> Result<bool> {
    match (on, off) {
        (true, true) => Err(Error::validation(
            format!("--{name} and --no-{name} cannot be used together"),
            Some(name.to_string()),
        )),
        (true, false) => Ok(true),
        (false, true) => Ok(false),
        (false, false) => Ok(default),
    }
}

fn parse_float(value: Option<&str>, name: &str, default: f32, max: f32) -> Result<f32> {
    let Some(value) = value else {
        return Ok(default);
    };
    let parsed: f32 = value.trim().parse().map_err(|_| {
        Error::validation(
            format!("--{name} expects a number, got {value:?}"),
            Some(name.to_string()),
        )
    })?;
    if !(0.0..=max).contains(&parsed) {
        return Err(Error::validation(
            format!("--{name} must be between 0.0 and {max:.1}"),
            Some(name.to_string()),
        ));
    }
    Ok(parsed)
}

/// The prompt from the arguments, preceded by piped stdin if there is any.
fn read_prompt(free: &[String]) -> Result<String> {
    let prompt = free.join(" ");
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(prompt);
    }
    let piped = read_piped(stdin.lock())?;
    Ok(compose_prompt(&piped, &prompt))
}

fn printer(role: &SystemRole, markdown: bool, config: &Config) -> Box<dyn Printer> {
    if markdown && role.wants_markdown() {
        Box::new(MarkdownPrinter::stdout(config))
    } else {
        Box::new(TextPrinter::stdout(config))
    }
}

async fn run(args: Args, free: Vec<String>) -> Result<()> {
    let config = Config::load()?;
    let store = ChatStore::from_config(&config);

    if args.list_chats {
        for id in list_ids(&store)? {
            println!("{}", store.dir().join(id).display());
        }
        return Ok(());
    }
    if let Some(chat_id) = &args.show_chat {
        return show_messages(&store, chat_id, &mut std::io::stdout());
    }

    let default_role = DefaultRole::from_flags(args.shell, args.describe_shell, args.code)?;
    if args.chat.is_some() && args.repl.is_some() {
        return Err(Error::validation(
            "--chat and --repl cannot be used together",
            Some("chat".to_string()),
        ));
    }
    let markdown = toggle(args.md, args.no_md, "md", config.prettify_markdown)?;
    let functions = toggle(
        args.functions,
        args.no_functions,
        "functions",
        config.use_functions,
    )?;
    let interaction = toggle(
        args.interaction,
        args.no_interaction,
        "interaction",
        config.shell_interaction,
    )?;
    let options = CompletionOptions::new(args.model.as_deref().unwrap_or(config.model()))
        .with_temperature(parse_float(args.temperature.as_deref(), "temperature", 0.0, 2.0)?)
        .with_top_p(parse_float(args.top_p.as_deref(), "top-p", 1.0, 1.0)?)
        .with_caching(!args.no_cache)
        .with_functions(functions);

    let prompt = read_prompt(&free)?;
    if prompt.trim().is_empty() && args.repl.is_none() {
        return Err(Error::validation("a prompt is required", Some("prompt".to_string())));
    }

    let env = ShellEnv::from_config(&config);
    let role = match &args.role {
        Some(name) => SystemRole::get(name, &config.role_storage_path, &env)?,
        None => default_role.role(&env),
    };
    debug!(role = %role.name, model = %options.model, prompt = %prompt, "invocation");
    if args.verbose {
        let width = terminal::size().map_or(FALLBACK_WIDTH, |(columns, _)| columns);
        print!("{}", debug_panels(&role, &prompt, width));
    }

    let interrupt = Interrupt::new();
    let flag = interrupt.flag();
    ctrlc::set_handler(move || {
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
    })
    .map_err(|err| Error::validation(format!("cannot install Ctrl-C handler: {err}"), None))?;

    let vendor = Arc::new(VendorAdapter::from_config(&config)?);
    let engine = CompletionEngine::new(
        vendor,
        FunctionRegistry::from_config(&config)?,
        Cache::from_config(&config),
    )
    .with_show_function_output(config.show_functions_output);

    if let Some(chat_id) = &args.repl {
        let chat = ChatHandler::new(engine, store, chat_id, role, interrupt)?;
        let mut printer = printer(chat.role(), markdown, &config);
        let initial = (!prompt.trim().is_empty()).then_some(prompt.as_str());
        return ReplHandler::new(chat, env)
            .run(initial, &options, printer.as_mut())
            .await;
    }

    let mut out = printer(&role, markdown, &config);
    let is_shell = role.is_shell();
    let printed = match &args.chat {
        Some(chat_id) => {
            let chat = ChatHandler::new(engine.clone(), store, chat_id, role, interrupt.clone())?;
            chat.handle(&prompt, &options, out.as_mut()).await?
        }
        None => {
            DefaultHandler::new(engine.clone(), role, interrupt.clone())
                .handle(&prompt, &options, out.as_mut())
                .await?
        }
    };

    if !is_shell || !interaction || printed.interrupted || printed.text.trim().is_empty() {
        return Ok(());
    }
    let default = if config.default_execute_shell_cmd {
        ShellAction::Execute
    } else {
        ShellAction::Abort
    };
    let mut editor = line_editor()?;
    loop {
        let Ok(answer) = editor.readline(&format!("{}: ", ShellAction::PROMPT)) else {
            return Ok(());
        };
        match ShellAction::parse(&answer, default) {
            Some(ShellAction::Execute) => {
                quill::shell::run_interactive(printed.text.trim()).await?;
                return Ok(());
            }
            Some(ShellAction::Describe) => {
                let describe = DefaultRole::DescribeShell.role(&env);
                let mut describe_out = printer(&describe, markdown, &config);
                DefaultHandler::new(engine.clone(), describe, interrupt.clone())
                    .handle(&printed.text, &options, describe_out.as_mut())
                    .await?;
            }
            Some(ShellAction::Abort) => return Ok(()),
            None => {}
        }
    }
}
