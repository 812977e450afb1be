use std::fmt::Display;

use crate::models::FormulationRequest;

/// Substituted for any list or free-text field the client left empty.
pub const NONE_SPECIFIED: &str = "特になし";

/// Builds the instruction sent to the model for one formulation request.
///
/// The output depends only on `request`, so identical requests always yield
/// identical prompts.
pub fn build_prompt(request: &FormulationRequest) -> String {
    let skin_types = join_or_placeholder(&request.skin_types);
    let effects = join_or_placeholder(&request.effects);
    let featured = join_or_placeholder(
        request.featured_ingredients.iter().map(|s| s.trim()).filter(|s| !s.is_empty()),
    );
    let include = text_or_placeholder(&request.include_ingredients);
    let exclude = text_or_placeholder(&request.exclude_ingredients);

    format!(
        "あなたは化粧品OEM企業の経験豊富な処方開発担当者です。クライアントからの以下の要望に基づき、革新的で安定性が高く、製造可能な化粧品の処方を提案してください。

# クライアントの要望
- 製品名: {product_name}
- ご担当者連絡先: {email}
- 製品コンセプト: {concept}
- 製品タイプ: {product_type}
- 対象肌質: {skin_types}
- 期待される効果: {effects}
- 弊社からの注目原料の利用希望: {featured}
- その他、配合したい成分: {include}
- 配合したくない成分: {exclude}
- テクスチャの希望: {texture}

# 提案に含めるべき項目
1. **処方詳細**: 各成分の配合率(%)と役割を明確にした、水相・油相などのフェーズごとの処方。合計が100%になるように構成してください。
2. **製造手順**: 専門家が理解できるレベルの詳細な製造工程。
3. **概算コスト**: この処方を製造した場合の、製品1個あたりの参考価格帯を文字列で提示してください。(例: \"約500円〜800円/個\")
4. **最小発注ロット(MOQ)**: この処方を弊社で製造する場合の、最小発注ロットを文字列で提示してください。(例: \"3,000個から\")
5. **注記事項**: 防腐設計、安定性、pH調整などに関する専門的な補足事項。

提案は、クライアントがすぐにでも製品開発を進めたいと思えるような、魅力的かつ具体的な内容にしてください。
必ずJSON形式で出力してください。
",
        product_name = request.product_name,
        email = request.email,
        concept = request.concept,
        product_type = request.product_type.label(),
        texture = request.texture.label(),
    )
}

fn join_or_placeholder<I>(items: I) -> String
where
    I: IntoIterator,
    I::Item: Display,
{
    let joined = items.into_iter().map(|item| item.to_string()).collect::<Vec<_>>().join(", ");
    if joined.is_empty() { NONE_SPECIFIED.to_string() } else { joined }
}

fn text_or_placeholder(text: &str) -> &str {
    let text = text.trim();
    if text.is_empty() { NONE_SPECIFIED } else { text }
}
