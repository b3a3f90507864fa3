use stagecraft_core::config::ModelConfig;

/// Known defaults for an OpenAI-compatible provider.
pub struct ProviderPreset {
    pub default_base_url: &'static str,
    pub needs_api_key: bool,
    pub extra_headers: &'static [(&'static str, &'static str)],
}

/// Look up a provider preset by name.
pub fn get_preset(provider: &str) -> Option<ProviderPreset> {
    let (default_base_url, needs_api_key, extra_headers): (
        &'static str,
        bool,
        &'static [(&'static str, &'static str)],
    ) = match provider {
        "openai" => ("https://api.openai.com/v1/chat/completions", true, &[]),
        "groq" => ("https://api.groq.com/openai/v1/chat/completions", true, &[]),
        "ollama" => ("http://localhost:11434/v1/chat/completions", false, &[]),
        "openrouter" => (
            "https://openrouter.ai/api/v1/chat/completions",
            true,
            &[("X-Title", "Stagecraft")],
        ),
        "together" => ("https://api.together.xyz/v1/chat/completions", true, &[]),
        "fireworks" => ("https://api.fireworks.ai/inference/v1/chat/completions", true, &[]),
        "cerebras" => ("https://api.cerebras.ai/v1/chat/completions", true, &[]),
        "mistral" => ("https://api.mistral.ai/v1/chat/completions", true, &[]),
        "deepseek" => ("https://api.deepseek.com/v1/chat/completions", true, &[]),
        _ => return None,
    };
    Some(ProviderPreset {
        default_base_url,
        needs_api_key,
        extra_headers,
    })
}

/// Fill in the preset's base URL and headers. Explicit config always wins.
pub fn resolve(config: &ModelConfig) -> ModelConfig {
    let mut resolved = config.clone();
    let Some(preset) = get_preset(&config.provider) else {
        return resolved;
    };

    if resolved.base_url.is_none() {
        resolved.base_url = Some(preset.default_base_url.to_string());
    }
    for (k, v) in preset.extra_headers {
        resolved
            .extra_headers
            .entry(k.to_string())
            .or_insert_with(|| v.to_string());
    }
    if preset.needs_api_key && resolved.api_key.is_none() {
        tracing::warn!(provider = %config.provider, "Provider expects an API key but none is configured");
    }
    resolved
}

/// List all known preset provider names.
pub fn all_preset_names() -> &'static [&'static str] {
    &[
        "openai",
        "groq",
        "ollama",
        "openrouter",
        "together",
        "fireworks",
        "cerebras",
        "mistral",
        "deepseek",
    ]
}
