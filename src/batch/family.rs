// ABOUTME: Queue families: the three pure functions that differ between batch schedulers.
// ABOUTME: Builds submit and delete commands and extracts job ids from submission output.

use crate::types::JobId;

/// What distinguishes one batch scheduler from another.
pub trait QueueFamily: Send + Sync + 'static {
    /// Short name used in logs and configuration.
    fn name(&self) -> &str;

    /// Command that submits `job_command` with scheduler `options`.
    fn submit_command(&self, job_command: &str, options: &str) -> String;

    /// Command that deletes a submitted job.
    fn delete_command(&self, job: &JobId) -> String;

    /// Job identifier printed by the submit command, if any.
    fn extract_job_id(&self, output: &str) -> Option<JobId>;
}

/// `echo "<job>" | <submit> <options>`, the job script being read from stdin.
///
/// The job is escaped so the front end's shell passes it through verbatim.
pub fn piped_submission(submit: &str, job_command: &str, options: &str) -> String {
    let mut escaped = String::with_capacity(job_command.len());
    for c in job_command.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    let options = options.trim();
    if options.is_empty() {
        format!("echo \"{escaped}\" | {submit}")
    } else {
        format!("echo \"{escaped}\" | {submit} {options}")
    }
}

/// Digits, optionally followed by a `.server` suffix or an array index.
fn plausible_job_id(token: &str) -> bool {
    token.chars().next().is_some_and(|c| c.is_ascii_digit())
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '[' | ']'))
}

/// PBS / Torque: `qsub` prints the job id alone on its first line.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pbs;

impl QueueFamily for Pbs {
    fn name(&self) -> &str {
        "pbs"
    }

    fn submit_command(&self, job_command: &str, options: &str) -> String {
        piped_submission("qsub", job_command, options)
    }

    fn delete_command(&self, job: &JobId) -> String {
        format!("qdel {job}")
    }

    fn extract_job_id(&self, output: &str) -> Option<JobId> {
        let token = output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())?
            .split_whitespace()
            .next()?;
        plausible_job_id(token).then(|| JobId::new(token))
    }
}

/// LSF: `bsub` prints `Job <1234> is submitted to queue <normal>.`
#[derive(Debug, Clone, Copy, Default)]
pub struct Lsf;

impl QueueFamily for Lsf {
    fn name(&self) -> &str {
        "lsf"
    }

    fn submit_command(&self, job_command: &str, options: &str) -> String {
        piped_submission("bsub", job_command, options)
    }

    fn delete_command(&self, job: &JobId) -> String {
        format!("bkill {job}")
    }

    fn extract_job_id(&self, output: &str) -> Option<JobId> {
        let (_, rest) = output.split_once("Job <")?;
        let (id, _) = rest.split_once('>')?;
        (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then(|| JobId::new(id))
    }
}

/// Grid Engine: `qsub` prints `Your job 4242 ("name") has been submitted`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sge;

impl QueueFamily for Sge {
    fn name(&self) -> &str {
        "sge"
    }

    fn submit_command(&self, job_command: &str, options: &str) -> String {
        piped_submission("qsub", job_command, options)
    }

    fn delete_command(&self, job: &JobId) -> String {
        format!("qdel {job}")
    }

    fn extract_job_id(&self, output: &str) -> Option<JobId> {
        let (_, rest) = output
            .split_once("Your job-array ")
            .or_else(|| output.split_once("Your job "))?;
        let id: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        (!id.is_empty()).then(|| JobId::new(id))
    }
}
