use async_trait::async_trait;
use rfstack_model::command::{Error, Result};
use rfstack_model::{CommandOutput, CommandRunner, Invocation};
use std::collections::VecDeque;
use std::sync::Mutex;

/// A successful command that printed `stdout`.
pub fn output<S: Into<String>>(stdout: S) -> CommandOutput {
    CommandOutput {
        code: 0,
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

/// A command that exited with `code` and printed `stderr`.
pub fn failure<S: Into<String>>(code: i32, stderr: S) -> CommandOutput {
    CommandOutput {
        code,
        stdout: String::new(),
        stderr: stderr.into(),
    }
}

#[derive(Debug, Clone)]
enum Response {
    Output(CommandOutput),
    /// The program does not exist on the host.
    Missing,
}

#[derive(Debug)]
struct Rule {
    program: String,
    args: Vec<String>,
    stdin: Option<String>,
    responses: VecDeque<Response>,
}

impl Rule {
    fn matches(&self, invocation: &Invocation) -> bool {
        if invocation.program() != self.program || !is_subsequence(&self.args, invocation) {
            return false;
        }
        match &self.stdin {
            None => true,
            Some(needle) => invocation
                .input()
                .map(|input| String::from_utf8_lossy(input).contains(needle.as_str()))
                .unwrap_or(false),
        }
    }

    /// The last response sticks once the queue is down to one.
    fn next(&mut self) -> Response {
        if self.responses.len() > 1 {
            if let Some(response) = self.responses.pop_front() {
                return response;
            }
        }
        self.responses
            .front()
            .cloned()
            .unwrap_or_else(|| Response::Output(CommandOutput::default()))
    }
}

/// `true` when every one of `args` appears in the invocation's arguments, in order.
fn is_subsequence(args: &[String], invocation: &Invocation) -> bool {
    let mut actual = invocation.arguments().iter();
    args.iter().all(|arg| actual.any(|candidate| candidate == arg))
}

/// A [`CommandRunner`] that answers from a script and records every invocation.
///
/// A rule matches on the program name and an in-order subset of the arguments. When more than
/// one rule matches, the one added last wins. Commands without a matching rule succeed with
/// empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, program: &str, args: &[&str], stdin: Option<&str>, responses: Vec<Response>) {
        self.rules.lock().unwrap().push(Rule {
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            stdin: stdin.map(str::to_string),
            responses: responses.into(),
        });
    }

    /// Always answer with `response`.
    pub fn respond(&self, program: &str, args: &[&str], response: CommandOutput) -> &Self {
        self.push(program, args, None, vec![Response::Output(response)]);
        self
    }

    /// Answer with each of `responses` in turn, then keep repeating the last one.
    pub fn respond_seq(
        &self,
        program: &str,
        args: &[&str],
        responses: Vec<CommandOutput>,
    ) -> &Self {
        let responses = responses.into_iter().map(Response::Output).collect();
        self.push(program, args, None, responses);
        self
    }

    /// Answer only when the command's stdin contains `needle`.
    pub fn respond_to_input(
        &self,
        program: &str,
        args: &[&str],
        needle: &str,
        response: CommandOutput,
    ) -> &Self {
        self.push(program, args, Some(needle), vec![Response::Output(response)]);
        self
    }

    /// `program` cannot be launched at all.
    pub fn missing(&self, program: &str) -> &Self {
        self.push(program, &[], None, vec![Response::Missing]);
        self
    }

    /// `program` is missing for the first call, then answers with `response`.
    pub fn appears_after_first_call(
        &self,
        program: &str,
        args: &[&str],
        response: CommandOutput,
    ) -> &Self {
        self.push(
            program,
            args,
            None,
            vec![Response::Missing, Response::Output(response)],
        );
        self
    }

    /// Every invocation so far, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Invocations of `program` whose arguments contain `args` in order.
    pub fn calls_to(&self, program: &str, args: &[&str]) -> Vec<Invocation> {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        self.calls()
            .into_iter()
            .filter(|call| call.program() == program && is_subsequence(&args, call))
            .collect()
    }

    pub fn called(&self, program: &str, args: &[&str]) -> bool {
        !self.calls_to(program, args).is_empty()
    }

    /// The documents piped into `kubectl apply`, in order.
    pub fn applied(&self) -> Vec<String> {
        self.calls_to("kubectl", &["apply"])
            .iter()
            .filter_map(|call| call.input())
            .map(|input| String::from_utf8_lossy(input).to_string())
            .collect()
    }

    /// The `kind` of every applied document, in order.
    pub fn applied_kinds(&self) -> Vec<String> {
        self.applied()
            .iter()
            .filter_map(|doc| {
                doc.lines()
                    .find_map(|line| line.strip_prefix("kind:"))
                    .map(|kind| kind.trim().to_string())
            })
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        let response = self
            .rules
            .lock()
            .unwrap()
            .iter_mut()
            .rev()
            .find(|rule| rule.matches(invocation))
            .map(|rule| rule.next());
        match response {
            None => Ok(CommandOutput::default()),
            Some(Response::Output(output)) => Ok(output),
            Some(Response::Missing) => Err(Error::Spawn {
                command: invocation.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }),
        }
    }
}
