//! Provider-credential fan-out for the job environment (§6.3). Given a
//! provider name and a decrypted secret value, produces every env var (and
//! matching secrets-sidecar key) that provider's credential needs to be
//! injected as.

/// Expand one provider secret into the env vars a task runtime expects.
/// Mirrors the fixed table in §6.3 exactly; unknown providers fall back to
/// `SECRET_<UPPER_PROVIDER_UNDERSCORED>`.
pub fn expand_provider_env(provider: &str, value: &str) -> Vec<(String, String)> {
    match provider {
        "github" => vec![
            ("GH_TOKEN".to_string(), value.to_string()),
            ("GITHUB_TOKEN".to_string(), value.to_string()),
        ],
        "codex" => vec![
            ("CODEX_API_KEY".to_string(), value.to_string()),
            ("OPENAI_API_KEY".to_string(), value.to_string()),
        ],
        "opencode" => vec![("OPENCODE_API_KEY".to_string(), value.to_string())],
        "claude-code" => vec![("ANTHROPIC_API_KEY".to_string(), value.to_string())],
        "zai" | "llmtornado" => vec![
            ("Z_AI_API_KEY".to_string(), value.to_string()),
            ("ANTHROPIC_AUTH_TOKEN".to_string(), value.to_string()),
            ("ANTHROPIC_API_KEY".to_string(), value.to_string()),
            ("ANTHROPIC_BASE_URL".to_string(), "https://api.z.ai/api/anthropic".to_string()),
        ],
        other => vec![(fallback_env_name(other), value.to_string())],
    }
}

fn fallback_env_name(provider: &str) -> String {
    let mut name = String::from("SECRET_");
    name.push_str(&provider.to_uppercase().replace(['-', '.'], "_"));
    name
}

/// Build both the job env map and the secrets sidecar map for a set of
/// provider secrets (same keys appear in both, per §6.3).
pub fn fan_out(secrets: &[(String, String)]) -> (Vec<(String, String)>, Vec<(String, String)>) {
    let mut env = Vec::new();
    for (provider, value) in secrets {
        env.extend(expand_provider_env(provider, value));
    }
    let sidecar = env.clone();
    (env, sidecar)
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;
