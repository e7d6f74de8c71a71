//! Language-specific build artifacts
//!
//! Every supported language gets the same three artifacts: the user source
//! as `function.{py,js}`, a minimal Dockerfile, and the wrapper that is the
//! container entrypoint. The wrapper contract is identical across
//! languages: read the event from `INPUT_DATA` (default `{}`), sample
//! metrics around the handler call, emit one line of envelope JSON on
//! stdout, and exit 0 even when the handler raised. Non-zero exits are
//! reserved for wrapper-level failure (corrupt source, missing handler).

use crate::database::Language;

/// File name the user source is written to
pub fn function_filename(language: Language) -> &'static str {
    match language {
        Language::Python => "function.py",
        Language::Javascript => "function.js",
    }
}

/// File name of the wrapper entrypoint
pub fn wrapper_filename(language: Language) -> &'static str {
    match language {
        Language::Python => "wrapper.py",
        Language::Javascript => "wrapper.js",
    }
}

/// Dockerfile selecting the language runtime image
pub fn dockerfile(language: Language) -> &'static str {
    match language {
        Language::Python => PYTHON_DOCKERFILE,
        Language::Javascript => JAVASCRIPT_DOCKERFILE,
    }
}

/// Wrapper entrypoint source
pub fn wrapper_source(language: Language) -> &'static str {
    match language {
        Language::Python => PYTHON_WRAPPER,
        Language::Javascript => JAVASCRIPT_WRAPPER,
    }
}

const PYTHON_DOCKERFILE: &str = r#"FROM python:3.11-slim

WORKDIR /app
COPY function.py wrapper.py /app/

RUN pip install --no-cache-dir psutil

CMD ["python", "wrapper.py"]
"#;

const JAVASCRIPT_DOCKERFILE: &str = r#"FROM node:20-slim

WORKDIR /app
COPY function.js wrapper.js /app/

CMD ["node", "wrapper.js"]
"#;

// An import failure here (bad source, no handler symbol) propagates as a
// non-zero exit, which the executor classifies as a wrapper failure.
const PYTHON_WRAPPER: &str = r#"import json
import os
import time
import traceback

import psutil

from function import handler


def main():
    try:
        event = json.loads(os.environ.get("INPUT_DATA", "{}"))
    except json.JSONDecodeError:
        event = {}

    process = psutil.Process(os.getpid())
    start = time.time()
    start_rss = process.memory_info().rss / (1024 * 1024)

    try:
        result = handler(event)
        status = "success"
        error = None
    except Exception as exc:
        result = None
        status = "error"
        error = "{}\n{}".format(exc, traceback.format_exc())

    duration_ms = (time.time() - start) * 1000
    memory_used_mb = process.memory_info().rss / (1024 * 1024) - start_rss
    cpu_percent = process.cpu_percent()

    print(json.dumps({
        "result": result,
        "status": status,
        "error": error,
        "metrics": {
            "duration_ms": duration_ms,
            "memory_used_mb": memory_used_mb,
            "cpu_percent": cpu_percent,
        },
    }))


if __name__ == "__main__":
    main()
"#;

const JAVASCRIPT_WRAPPER: &str = r#"const { handler } = require('./function');

if (typeof handler !== 'function') {
    console.error('wrapper failure: function.js does not export a handler function');
    process.exit(1);
}

async function main() {
    let event;
    try {
        event = JSON.parse(process.env.INPUT_DATA || '{}');
    } catch (e) {
        event = {};
    }

    const startCpu = process.cpuUsage();
    const startMem = process.memoryUsage().rss / (1024 * 1024);
    const start = process.hrtime.bigint();

    let result = null;
    let status = 'success';
    let error = null;
    try {
        result = await handler(event);
    } catch (e) {
        status = 'error';
        error = e.stack || String(e);
    }

    const durationMs = Number(process.hrtime.bigint() - start) / 1e6;
    const memoryUsedMb = process.memoryUsage().rss / (1024 * 1024) - startMem;
    const cpu = process.cpuUsage(startCpu);
    const cpuPercent = durationMs > 0 ? ((cpu.user + cpu.system) / 1000 / durationMs) * 100 : 0;

    process.stdout.write(JSON.stringify({
        result: result === undefined ? null : result,
        status: status,
        error: error,
        metrics: {
            duration_ms: durationMs,
            memory_used_mb: memoryUsedMb,
            cpu_percent: cpuPercent,
        },
    }) + '\n');
}

main().catch((e) => {
    console.error('wrapper failure:', e);
    process.exit(1);
});
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_artifacts() {
        assert_eq!(function_filename(Language::Python), "function.py");
        assert_eq!(wrapper_filename(Language::Python), "wrapper.py");

        let wrapper = wrapper_source(Language::Python);
        assert!(wrapper.contains("INPUT_DATA"));
        assert!(wrapper.contains("from function import handler"));
        // Exactly one stdout write carrying the envelope
        assert_eq!(wrapper.matches("print(").count(), 1);

        let dockerfile = dockerfile(Language::Python);
        assert!(dockerfile.contains("FROM python"));
        assert!(dockerfile.contains("psutil"));
        assert!(dockerfile.contains(r#"CMD ["python", "wrapper.py"]"#));
    }

    #[test]
    fn test_javascript_artifacts() {
        assert_eq!(function_filename(Language::Javascript), "function.js");

        let wrapper = wrapper_source(Language::Javascript);
        assert!(wrapper.contains("INPUT_DATA"));
        assert!(wrapper.contains("require('./function')"));
        assert!(wrapper.contains("process.exit(1)"));

        let dockerfile = dockerfile(Language::Javascript);
        assert!(dockerfile.contains("FROM node"));
        assert!(dockerfile.contains(r#"CMD ["node", "wrapper.js"]"#));
    }

    #[test]
    fn test_wrappers_emit_envelope_fields() {
        for language in [Language::Python, Language::Javascript] {
            let wrapper = wrapper_source(language);
            for field in ["result", "status", "error", "duration_ms", "memory_used_mb", "cpu_percent"] {
                assert!(wrapper.contains(field), "{} wrapper missing {}", language, field);
            }
        }
    }
}
