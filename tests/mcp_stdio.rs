use std::{
    path::{Path, PathBuf},
    process::Command,
};

use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;

fn run_cli(
    data_dir: &Path,
    args: &[&str],
) -> Result<String, Box<dyn std::error::Error>> {
    let output = Command::new(docwhisper_bin()?)
        .args(args)
        .env("DOCWHISPER_DATA_DIR", data_dir)
        .env_remove("DOCWHISPER_EMBEDDER")
        .env_remove("DOCWHISPER_MODEL")
        .output()?;
    if !output.status.success() {
        return Err(format!(
            "docwhisper {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )
        .into());
    }
    Ok(String::from_utf8(output.stdout)?)
}

fn setup_fixture(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let docs = data_dir.join("docs");
    std::fs::create_dir_all(&docs)?;
    std::fs::write(docs.join("recipe.md"), "Apple pie recipe.")?;
    std::fs::write(docs.join("oven.txt"), "Bake at 350 degrees.")?;

    run_cli(data_dir, &["config", "set", "embedder", "hashing"])?;
    run_cli(data_dir, &["config", "set", "hashing_dimension", "64"])?;
    run_cli(data_dir, &["config", "set", "generator_command", "cat"])?;
    let added = run_cli(data_dir, &["add", docs.to_str().unwrap()])?;
    assert!(added.contains("Indexed 2 document(s)"), "{added}");

    let again = run_cli(data_dir, &["add", docs.to_str().unwrap()])?;
    assert!(again.contains("Nothing new to index"), "{again}");
    Ok(())
}

#[tokio::test]
async fn mcp_stdio_search_roundtrip() -> Result<(), Box<dyn std::error::Error>>
{
    let tempdir = tempfile::tempdir()?;
    setup_fixture(tempdir.path())?;

    let bin = docwhisper_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("mcp")
                .env("DOCWHISPER_DATA_DIR", tempdir.path())
                .env_remove("DOCWHISPER_EMBEDDER");
        }),
    )?;

    let client = ().serve(transport).await?;

    let args = json!({
        "query": "Bake at 350 degrees.",
        "k": 1,
    });

    let result = client
        .peer()
        .call_tool(
            CallToolRequestParams::new("docwhisper_search")
                .with_arguments(args.as_object().unwrap().clone()),
        )
        .await?;

    let structured = result.structured_content.expect("structured content");
    let results = structured
        .get("results")
        .and_then(|v| v.as_array())
        .expect("results array");

    assert_eq!(results.len(), 1);
    let source = results[0]
        .get("source")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    assert!(source.ends_with("oven.txt"), "{source}");

    #[cfg(unix)]
    {
        let ask_args = json!({ "query": "How hot?", "k": 1 });
        let answer = client
            .peer()
            .call_tool(
                CallToolRequestParams::new("docwhisper_ask")
                    .with_arguments(ask_args.as_object().unwrap().clone()),
            )
            .await?;
        assert_eq!(answer.is_error, Some(false));
        let text = answer
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default();
        assert!(text.contains("Question: How hot?"), "{text}");
    }

    client.cancel().await?;
    Ok(())
}

fn docwhisper_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_docwhisper") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("docwhisper");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
