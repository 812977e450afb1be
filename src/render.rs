use std::fmt::Write;

use crate::models::{Formulation, Phase};

pub const DISCLAIMER: &str =
    "免責事項: AIが生成した処方は研究開発目的のものです。商用利用の前に、専門家による検証と安全性試験が必要です。";

/// Renders a formulation as a markdown sheet: overview, one table per phase,
/// numbered manufacturing steps and notes.
pub fn render_markdown(formulation: &Formulation) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_sheet(&mut out, formulation);
    out
}

fn write_sheet(out: &mut String, f: &Formulation) -> std::fmt::Result {
    writeln!(out, "# {}", inline(&f.product_name))?;
    writeln!(out)?;
    writeln!(out, "**{}**", inline(&f.product_type))?;
    writeln!(out)?;

    writeln!(out, "## コンセプト")?;
    writeln!(out)?;
    writeln!(out, "{}", f.concept.trim())?;
    writeln!(out)?;
    writeln!(out, "{}", f.suitability.trim())?;
    writeln!(out)?;
    writeln!(out, "- 概算コスト: {}", inline(&f.estimated_cost))?;
    writeln!(out, "- 最小発注ロット: {}", inline(&f.moq))?;
    writeln!(out)?;

    writeln!(out, "## 処方")?;
    for phase in &f.phases {
        writeln!(out)?;
        write_phase(out, phase)?;
    }
    writeln!(out)?;

    writeln!(out, "## 製造手順")?;
    writeln!(out)?;
    for (index, step) in f.instructions.iter().enumerate() {
        writeln!(out, "{}. {}", index + 1, inline(step))?;
    }
    writeln!(out)?;

    writeln!(out, "## 注記事項")?;
    writeln!(out)?;
    writeln!(out, "{}", f.notes.trim())?;
    writeln!(out)?;
    writeln!(out, "---")?;
    writeln!(out)?;
    writeln!(out, "{DISCLAIMER}")
}

fn write_phase(out: &mut String, phase: &Phase) -> std::fmt::Result {
    writeln!(out, "### {}", inline(&phase.phase_name))?;
    writeln!(out)?;
    writeln!(out, "| 成分名 | 配合率 (%) | 役割 |")?;
    writeln!(out, "| --- | ---: | --- |")?;
    for ing in &phase.ingredients {
        writeln!(out, "| {} | {:.2} | {} |", cell(&ing.name), ing.percentage, cell(&ing.role))?;
    }
    writeln!(out, "| 小計 | {:.2} | |", phase.total_percentage())
}

fn inline(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cell(text: &str) -> String {
    inline(text).replace('|', "\\|")
}
