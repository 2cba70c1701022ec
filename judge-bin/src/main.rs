#[macro_use]
extern crate error_chain;

use std::path::{Path, PathBuf};

use error_chain::ChainedError;
use serde::Deserialize;

use judge::{CancellationToken, ComparisonMode, Settings, Task, TaskType, TestJob};

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        Judge(::judge::Error, ::judge::ErrorKind);
    }

    foreign_links {
        Io(::std::io::Error);
        Yaml(::serde_yaml::Error);
    }

    errors {
        InvalidComparisonMode(value: String) {
            description("invalid comparison mode")
            display("invalid comparison mode: {}", value)
        }

        InvalidTaskType(value: String) {
            description("invalid task type")
            display("invalid task type: {}", value)
        }
    }
}

/// Minimal `Settings` implementation, loaded from a small YAML file. Scaled
/// down to the one setting the judging core actually consumes.
#[derive(Debug, Deserialize)]
struct FileSettings {
    data_root: PathBuf,
}

impl Settings for FileSettings {
    fn data_path(&self) -> &Path {
        &self.data_root
    }
}

fn load_settings(config_file: &Path) -> Result<FileSettings> {
    let content = std::fs::read_to_string(config_file)?;
    let settings: FileSettings = serde_yaml::from_str(&content)?;
    Ok(settings)
}

/// A `Task` built directly from command-line flags.
struct StaticTask {
    task_type: TaskType,
    comparison_mode: ComparisonMode,
    uses_stdin: bool,
    uses_stdout: bool,
    input_file_name: String,
    output_file_name: String,
    special_judge_path: String,
    real_precision: u32,
}

impl Task for StaticTask {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn comparison_mode(&self) -> ComparisonMode {
        self.comparison_mode
    }

    fn uses_stdin(&self) -> bool {
        self.uses_stdin
    }

    fn uses_stdout(&self) -> bool {
        self.uses_stdout
    }

    fn input_file_name(&self) -> &str {
        &self.input_file_name
    }

    fn output_file_name(&self) -> &str {
        &self.output_file_name
    }

    fn special_judge_path(&self) -> &str {
        &self.special_judge_path
    }

    fn real_precision(&self) -> u32 {
        self.real_precision
    }
}

fn parse_comparison_mode(value: &str) -> Result<ComparisonMode> {
    match value {
        "line" => Ok(ComparisonMode::LineByLine),
        "real" => Ok(ComparisonMode::RealNumber),
        "special" => Ok(ComparisonMode::SpecialJudge),
        _ => Err(ErrorKind::InvalidComparisonMode(value.to_string()).into()),
    }
}

fn parse_task_type(value: &str) -> Result<TaskType> {
    match value {
        "traditional" => Ok(TaskType::Traditional),
        "answers-only" => Ok(TaskType::AnswersOnly),
        _ => Err(ErrorKind::InvalidTaskType(value.to_string()).into()),
    }
}

fn get_arg_matches() -> clap::ArgMatches<'static> {
    clap::App::new("judge-bin")
        .version("0.1.0")
        .author("Lancern <msrlancern@126.com>")
        .about("Judge a single test case against a compiled contestant program.")
        .arg(clap::Arg::with_name("config")
            .long("config")
            .required(true)
            .takes_value(true)
            .value_name("SETTINGS_YAML")
            .help("path to a YAML file providing data_root"))
        .arg(clap::Arg::with_name("task_type")
            .long("task")
            .takes_value(true)
            .possible_values(&["traditional", "answers-only"])
            .default_value("traditional")
            .help("whether to execute the contestant or compare a submitted answer"))
        .arg(clap::Arg::with_name("mode")
            .long("mode")
            .takes_value(true)
            .possible_values(&["line", "real", "special"])
            .default_value("line")
            .help("output comparison strategy"))
        .arg(clap::Arg::with_name("stdin")
            .long("stdin")
            .help("contestant reads standard input instead of a named file"))
        .arg(clap::Arg::with_name("stdout")
            .long("stdout")
            .help("contestant writes standard output instead of a named file"))
        .arg(clap::Arg::with_name("input_name")
            .long("input-name")
            .takes_value(true)
            .default_value("input.txt")
            .help("file name the contestant expects its input under, when not using stdin"))
        .arg(clap::Arg::with_name("output_name")
            .long("output-name")
            .takes_value(true)
            .default_value("output.txt")
            .help("file name the contestant is expected to produce, when not using stdout"))
        .arg(clap::Arg::with_name("special_judge")
            .long("special-judge")
            .takes_value(true)
            .default_value("")
            .help("path to the special judge binary, relative to data_root"))
        .arg(clap::Arg::with_name("special_judge_time_limit")
            .long("special-judge-time-limit")
            .takes_value(true)
            .default_value("5000")
            .help("special judge wall-clock time limit, in milliseconds"))
        .arg(clap::Arg::with_name("real_precision")
            .long("real-precision")
            .takes_value(true)
            .default_value("6")
            .help("decimal digits tolerated by the RealNumber comparator"))
        .arg(clap::Arg::with_name("time_limit")
            .short("t")
            .long("time-limit")
            .takes_value(true)
            .default_value("1000")
            .help("time limit, in milliseconds"))
        .arg(clap::Arg::with_name("extra_time_ratio")
            .long("extra-time-ratio")
            .takes_value(true)
            .default_value("0.0")
            .help("fractional slack used by the rejudge policy"))
        .arg(clap::Arg::with_name("memory_limit")
            .short("m")
            .long("memory-limit")
            .takes_value(true)
            .default_value("256")
            .help("memory limit, in mebibytes; negative disables enforcement"))
        .arg(clap::Arg::with_name("full_score")
            .long("full-score")
            .takes_value(true)
            .default_value("100")
            .help("score awarded for a fully correct answer"))
        .arg(clap::Arg::with_name("rejudge")
            .long("rejudge")
            .help("run in rejudge mode: borderline timeouts are retried inline"))
        .arg(clap::Arg::with_name("working_dir")
            .short("w")
            .long("working-dir")
            .required(true)
            .takes_value(true)
            .value_name("WORKING_DIR")
            .help("exclusive, pre-existing working directory for this judgment"))
        .arg(clap::Arg::with_name("input_file")
            .long("input")
            .required(true)
            .takes_value(true)
            .value_name("INPUT_FILE")
            .help("standard input file for this test case"))
        .arg(clap::Arg::with_name("reference_output")
            .long("reference")
            .required(true)
            .takes_value(true)
            .value_name("REFERENCE_OUTPUT")
            .help("reference (expected) output file"))
        .arg(clap::Arg::with_name("answer_file")
            .long("answer")
            .takes_value(true)
            .value_name("ANSWER_FILE")
            .help("the contestant's pre-submitted answer, for answers-only tasks"))
        .arg(clap::Arg::with_name("program")
            .required(true)
            .takes_value(true)
            .value_name("PROGRAM")
            .help("path to the contestant executable"))
        .get_matches()
}

fn build_test_job(matches: &clap::ArgMatches<'_>) -> Result<TestJob> {
    let uses_stdin = matches.is_present("stdin");
    let uses_stdout = matches.is_present("stdout");

    let task = StaticTask {
        task_type: parse_task_type(matches.value_of("task_type").unwrap())?,
        comparison_mode: parse_comparison_mode(matches.value_of("mode").unwrap())?,
        uses_stdin,
        uses_stdout,
        input_file_name: matches.value_of("input_name").unwrap().to_string(),
        output_file_name: matches.value_of("output_name").unwrap().to_string(),
        special_judge_path: matches.value_of("special_judge").unwrap().to_string(),
        real_precision: matches
            .value_of("real_precision")
            .unwrap()
            .parse()
            .chain_err(|| "invalid --real-precision")?,
    };

    Ok(TestJob {
        executable_path: PathBuf::from(matches.value_of("program").unwrap()),
        working_directory: PathBuf::from(matches.value_of("working_dir").unwrap()),
        input_file: PathBuf::from(matches.value_of("input_file").unwrap()),
        reference_output_file: PathBuf::from(matches.value_of("reference_output").unwrap()),
        answer_file: matches.value_of("answer_file").map(PathBuf::from),
        task_type: task.task_type(),
        comparison_mode: task.comparison_mode(),
        uses_stdin,
        uses_stdout,
        input_filename: task.input_file_name().to_string(),
        output_filename: task.output_file_name().to_string(),
        time_limit_ms: matches
            .value_of("time_limit")
            .unwrap()
            .parse()
            .chain_err(|| "invalid --time-limit")?,
        memory_limit_mib: matches
            .value_of("memory_limit")
            .unwrap()
            .parse()
            .chain_err(|| "invalid --memory-limit")?,
        full_score: matches
            .value_of("full_score")
            .unwrap()
            .parse()
            .chain_err(|| "invalid --full-score")?,
        real_precision: task.real_precision(),
        special_judge_path: task.special_judge_path().to_string(),
        special_judge_time_limit_ms: matches
            .value_of("special_judge_time_limit")
            .unwrap()
            .parse()
            .chain_err(|| "invalid --special-judge-time-limit")?,
        extra_time_ratio: matches
            .value_of("extra_time_ratio")
            .unwrap()
            .parse()
            .chain_err(|| "invalid --extra-time-ratio")?,
        check_rejudge_mode: matches.is_present("rejudge"),
        environment: Vec::new(),
    })
}

fn do_main() -> Result<()> {
    stderrlog::new().quiet(false).verbosity(5).init().unwrap();

    let matches = get_arg_matches();

    let settings = load_settings(Path::new(matches.value_of("config").unwrap()))?;
    let job = build_test_job(&matches)?;

    let cancel = CancellationToken::new();
    match judge::judge(&job, &settings, cancel)? {
        Some(result) => {
            println!("result: {:?}", result.result);
            println!("score: {}", result.score);
            println!("time_used_ms: {}", result.time_used_ms);
            println!("memory_used_bytes: {}", result.memory_used_bytes);
            println!("needs_rejudge: {}", result.needs_rejudge);
            if !result.message.is_empty() {
                println!("message: {}", result.message);
            }
            Ok(())
        }
        None => {
            eprintln!("judgment cancelled");
            std::process::exit(2);
        }
    }
}

fn main() {
    match do_main() {
        Ok(()) => (),
        Err(e) => {
            eprintln!("error: {}", e.display_chain().to_string());
            std::process::exit(1);
        }
    }
}
