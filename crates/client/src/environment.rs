//! Build environment detection.
//!
//! Resolves branch, commit, pull request, and parallel-shard metadata
//! once at startup. Each value is looked up in priority order: explicit
//! `SNAPGATE_*` override, then the detected CI service's variables, then
//! local git inspection. Whatever remains unknown is sent as null and
//! the server applies its own defaults.

use std::process::Command;

use tracing::warn;

use crate::env::EnvReader;

/// CI services with first-class detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiService {
    Travis,
    Jenkins,
    Circle,
    Codeship,
    Drone,
    Semaphore,
    Buildkite,
    Gitlab,
}

impl std::fmt::Display for CiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Travis => "travis",
            Self::Jenkins => "jenkins",
            Self::Circle => "circle",
            Self::Codeship => "codeship",
            Self::Drone => "drone",
            Self::Semaphore => "semaphore",
            Self::Buildkite => "buildkite",
            Self::Gitlab => "gitlab",
        };
        f.write_str(name)
    }
}

/// Commit metadata attached to a build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitInfo {
    pub sha: Option<String>,
    pub message: Option<String>,
    pub committed_at: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub committer_name: Option<String>,
    pub committer_email: Option<String>,
}

/// Everything the build-create call needs to know about where it runs.
#[derive(Debug, Clone, Default)]
pub struct BuildEnvironment {
    pub ci: Option<CiService>,
    /// CI name plus server version where available, for the user agent.
    pub ci_info: Option<String>,
    pub branch: Option<String>,
    pub target_branch: Option<String>,
    pub target_commit_sha: Option<String>,
    pub commit: CommitInfo,
    pub pull_request_number: Option<String>,
    pub parallel_nonce: Option<String>,
    pub parallel_total_shards: Option<i64>,
}

/// One CI service's detection predicate and value extractors.
struct CiStrategy {
    service: CiService,
    detect: fn(&dyn EnvReader) -> bool,
    commit_sha: fn(&dyn EnvReader) -> Option<String>,
    branch: fn(&dyn EnvReader) -> Option<String>,
    pull_request: fn(&dyn EnvReader) -> Option<String>,
    nonce: fn(&dyn EnvReader) -> Option<String>,
    total_shards: fn(&dyn EnvReader) -> Option<i64>,
}

fn none_string(_env: &dyn EnvReader) -> Option<String> {
    None
}

fn none_shards(_env: &dyn EnvReader) -> Option<i64> {
    None
}

fn parse_shards(env: &dyn EnvReader, var: &str) -> Option<i64> {
    let value = env.get(var).filter(|v| !v.is_empty())?;
    match value.parse::<i64>() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!(var, value = %value, "ignoring non-numeric shard count");
            None
        }
    }
}

/// Detection order matters: the first matching service wins.
const CI_STRATEGIES: &[CiStrategy] = &[
    CiStrategy {
        service: CiService::Travis,
        detect: |env| env.get("TRAVIS_BUILD_ID").is_some(),
        commit_sha: |env| env.get("TRAVIS_COMMIT"),
        branch: |env| {
            // On pull request builds the branch var holds the target, not
            // the source branch.
            let is_pr = env
                .get("TRAVIS_PULL_REQUEST")
                .is_some_and(|v| v != "false");
            if is_pr {
                env.get("TRAVIS_PULL_REQUEST_BRANCH")
            } else {
                env.get("TRAVIS_BRANCH")
            }
        },
        pull_request: |env| env.get("TRAVIS_PULL_REQUEST").filter(|v| v != "false"),
        nonce: |env| env.get("TRAVIS_BUILD_NUMBER"),
        total_shards: |env| parse_shards(env, "CI_NODE_TOTAL"),
    },
    CiStrategy {
        // Jenkins with the GitHub Pull Request Builder plugin.
        service: CiService::Jenkins,
        detect: |env| env.get("JENKINS_URL").is_some() && env.get("ghprbPullId").is_some(),
        commit_sha: |env| env.get("ghprbActualCommit").or_else(|| env.get("GIT_COMMIT")),
        branch: |env| env.get("ghprbSourceBranch"),
        pull_request: |env| env.get("ghprbPullId"),
        nonce: |env| env.get("BUILD_NUMBER"),
        total_shards: none_shards,
    },
    CiStrategy {
        service: CiService::Circle,
        detect: |env| env.get("CIRCLECI").is_some(),
        commit_sha: |env| env.get("CIRCLE_SHA1"),
        branch: |env| env.get("CIRCLE_BRANCH"),
        pull_request: |env| {
            let prs = env.get("CI_PULL_REQUESTS").filter(|v| !v.is_empty())?;
            prs.rsplit('/').next().map(str::to_string)
        },
        nonce: |env| {
            env.get("CIRCLE_WORKFLOW_WORKSPACE_ID")
                .or_else(|| env.get("CIRCLE_BUILD_NUM"))
        },
        total_shards: |env| parse_shards(env, "CIRCLE_NODE_TOTAL"),
    },
    CiStrategy {
        service: CiService::Codeship,
        detect: |env| env.get("CI_NAME").as_deref() == Some("codeship"),
        commit_sha: |env| env.get("CI_COMMIT_ID"),
        branch: |env| env.get("CI_BRANCH"),
        // Codeship's pull request variable is always "false".
        pull_request: none_string,
        nonce: |env| env.get("CI_BUILD_NUMBER"),
        total_shards: |env| parse_shards(env, "CI_NODE_TOTAL"),
    },
    CiStrategy {
        service: CiService::Drone,
        detect: |env| env.get("DRONE").as_deref() == Some("true"),
        commit_sha: |env| env.get("DRONE_COMMIT"),
        branch: |env| env.get("DRONE_BRANCH"),
        pull_request: |env| env.get("CI_PULL_REQUEST"),
        nonce: none_string,
        total_shards: none_shards,
    },
    CiStrategy {
        service: CiService::Semaphore,
        detect: |env| env.get("SEMAPHORE").as_deref() == Some("true"),
        commit_sha: |env| env.get("REVISION"),
        branch: |env| env.get("BRANCH_NAME"),
        pull_request: |env| env.get("PULL_REQUEST_NUMBER"),
        nonce: |env| {
            let branch_id = env.get("SEMAPHORE_BRANCH_ID");
            let build_number = env.get("SEMAPHORE_BUILD_NUMBER");
            if branch_id.is_none() && build_number.is_none() {
                return None;
            }
            Some(format!(
                "{}/{}",
                branch_id.unwrap_or_default(),
                build_number.unwrap_or_default()
            ))
        },
        total_shards: |env| parse_shards(env, "SEMAPHORE_THREAD_COUNT"),
    },
    CiStrategy {
        service: CiService::Buildkite,
        detect: |env| env.get("BUILDKITE").as_deref() == Some("true"),
        commit_sha: |env| {
            // Buildkite puts the literal "HEAD" in rebuilds; treat it as
            // unknown so git resolves the real sha.
            env.get("BUILDKITE_COMMIT").filter(|v| v != "HEAD")
        },
        branch: |env| env.get("BUILDKITE_BRANCH"),
        pull_request: |env| env.get("BUILDKITE_PULL_REQUEST").filter(|v| v != "false"),
        nonce: |env| env.get("BUILDKITE_BUILD_ID"),
        total_shards: |env| parse_shards(env, "BUILDKITE_PARALLEL_JOB_COUNT"),
    },
    CiStrategy {
        service: CiService::Gitlab,
        detect: |env| env.get("GITLAB_CI").as_deref() == Some("true"),
        commit_sha: |env| env.get("CI_COMMIT_SHA"),
        branch: |env| env.get("CI_COMMIT_REF_NAME"),
        pull_request: none_string,
        nonce: |env| env.get("CI_JOB_ID"),
        total_shards: none_shards,
    },
];

// ---------------------------------------------------------------------------
// Git inspection
// ---------------------------------------------------------------------------

const GIT_SHOW_FORMAT: &str = "COMMIT_SHA:%H%nAUTHOR_NAME:%an%nAUTHOR_EMAIL:%ae%nCOMMITTER_NAME:%cn%nCOMMITTER_EMAIL:%ce%nCOMMITTED_DATE:%ai%nCOMMIT_MESSAGE:%B";

/// Local git repository inspection.
pub trait GitProbe {
    /// Returns `git show --quiet <sha-or-HEAD>` output in the fixed
    /// line format, or `None` if the command fails.
    fn show(&self, commit_sha: Option<&str>) -> Option<String>;

    /// Returns `git rev-parse --abbrev-ref HEAD` output, trimmed.
    fn head_branch(&self) -> Option<String>;
}

/// Shells out to the `git` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitCli;

impl GitCli {
    fn run(args: &[&str]) -> Option<String> {
        let output = Command::new("git").args(args).output().ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl GitProbe for GitCli {
    fn show(&self, commit_sha: Option<&str>) -> Option<String> {
        let sha = commit_sha.unwrap_or("HEAD");
        let format = format!("--format={GIT_SHOW_FORMAT}");
        Self::run(&["show", "--quiet", sha, &format])
    }

    fn head_branch(&self) -> Option<String> {
        Self::run(&["rev-parse", "--abbrev-ref", "HEAD"])
    }
}

/// Extracts one field value from the `git show` line format. The commit
/// message comes last in the format, so field lines are matched on first
/// occurrence and a multi-line message cannot shadow them.
fn parse_field(output: &str, prefix: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix(prefix))
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

fn parse_commit_output(output: &str) -> CommitInfo {
    CommitInfo {
        sha: parse_field(output, "COMMIT_SHA:"),
        message: parse_field(output, "COMMIT_MESSAGE:"),
        committed_at: parse_field(output, "COMMITTED_DATE:"),
        author_name: parse_field(output, "AUTHOR_NAME:"),
        author_email: parse_field(output, "AUTHOR_EMAIL:"),
        committer_name: parse_field(output, "COMMITTER_NAME:"),
        committer_email: parse_field(output, "COMMITTER_EMAIL:"),
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

impl BuildEnvironment {
    /// Resolves from the process environment and the system git binary.
    pub fn resolve() -> Self {
        Self::resolve_in(&crate::env::ProcessEnv, &GitCli)
    }

    /// Resolves from the given environment view and git probe.
    pub fn resolve_in(env: &dyn EnvReader, git: &dyn GitProbe) -> Self {
        let strategy = CI_STRATEGIES.iter().find(|s| (s.detect)(env));
        let ci = strategy.map(|s| s.service);

        let ci_info = ci.map(|service| match service {
            CiService::Gitlab => match env.get("CI_SERVER_VERSION") {
                Some(version) => format!("{service}/{version}"),
                None => service.to_string(),
            },
            _ => service.to_string(),
        });

        // Known sha before asking git, so `git show` resolves the same
        // commit the CI checked out rather than a moved HEAD.
        let known_sha = env
            .get("SNAPGATE_COMMIT")
            .or_else(|| strategy.and_then(|s| (s.commit_sha)(env)));

        let git_output = match known_sha.as_deref() {
            Some(sha) => git.show(Some(sha)).or_else(|| git.show(None)),
            None => git.show(None),
        };
        let parsed = git_output.as_deref().map(parse_commit_output);

        let mut commit = parsed.unwrap_or_default();
        commit.sha = known_sha.or(commit.sha);
        // Jenkins' git plugin exports these; use them when git itself had
        // no answer.
        commit.author_name = commit.author_name.or_else(|| env.get("GIT_AUTHOR_NAME"));
        commit.author_email = commit.author_email.or_else(|| env.get("GIT_AUTHOR_EMAIL"));
        commit.committer_name = commit
            .committer_name
            .or_else(|| env.get("GIT_COMMITTER_NAME"));
        commit.committer_email = commit
            .committer_email
            .or_else(|| env.get("GIT_COMMITTER_EMAIL"));

        let branch = env.get("SNAPGATE_BRANCH").or_else(|| match strategy {
            Some(s) => (s.branch)(env),
            None => match git.head_branch() {
                Some(name) if !name.is_empty() => Some(name),
                _ => {
                    warn!("not in a git repository, no branch detected");
                    None
                }
            },
        });

        let pull_request_number = env
            .get("SNAPGATE_PULL_REQUEST")
            .or_else(|| strategy.and_then(|s| (s.pull_request)(env)));

        let parallel_nonce = env
            .get("SNAPGATE_PARALLEL_NONCE")
            .or_else(|| strategy.and_then(|s| (s.nonce)(env)));

        let parallel_total_shards = match env.get("SNAPGATE_PARALLEL_TOTAL") {
            Some(value) => match value.parse::<i64>() {
                Ok(n) => Some(n),
                Err(_) => {
                    warn!(value = %value, "ignoring non-numeric SNAPGATE_PARALLEL_TOTAL");
                    None
                }
            },
            None => strategy.and_then(|s| (s.total_shards)(env)),
        };

        BuildEnvironment {
            ci,
            ci_info,
            branch,
            target_branch: env.get("SNAPGATE_TARGET_BRANCH"),
            target_commit_sha: env.get("SNAPGATE_TARGET_COMMIT"),
            commit,
            pull_request_number,
            parallel_nonce,
            parallel_total_shards,
        }
    }
}
