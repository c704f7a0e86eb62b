// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Localized message catalog.
//!
//! The engine deals only in message keys; adapters receive fully rendered
//! strings.  Templates exist for the four supported report languages; English
//! is the fallback for unknown language codes, Arabic is the configured
//! default for users with no preference.

/// Report languages accepted from chat input.
pub const SUPPORTED_LANGS: [&str; 4] = ["ar", "en", "ku", "ckb"];

/// Languages rendered right-to-left by adapters.
pub const RTL_LANGS: [&str; 3] = ["ar", "ku", "ckb"];

/// Whether a language code belongs to the supported set.
pub fn is_supported(lang: &str) -> bool {
    SUPPORTED_LANGS.contains(&lang)
}

/// Resolve the effective report language for a job.
///
/// Precedence: explicit job language, then the user's stored preference,
/// then the configured default.  Unsupported codes fall through.
pub fn resolve_language(requested: Option<&str>, preferred: Option<&str>, default: &str) -> String {
    for candidate in [requested, preferred, Some(default)].into_iter().flatten() {
        let lower = candidate.trim().to_lowercase();
        if is_supported(&lower) {
            return lower;
        }
    }
    "ar".to_owned()
}

/// Catalog entry: templates ordered `[ar, en, ku, ckb]`.
fn entry(key: &str) -> Option<[&'static str; 4]> {
    match key {
        "auth.not_active" => Some([
            "⛔ حسابك غير مفعل. تواصل مع الإدارة للتفعيل.",
            "⛔ Your account is not active. Contact support to activate.",
            "⛔ هەژمارا تە نەهاتیە چالاکرن. پەیوەندیێ ب رێڤەبەریێ بکە.",
            "⛔ هەژمارەکەت چالاک نییە. پەیوەندی بە بەڕێوەبەرایەتییەوە بکە.",
        ]),
        "auth.expired" => Some([
            "⛔ انتهى اشتراكك. جدد الاشتراك للمتابعة.",
            "⛔ Your subscription has expired. Renew to continue.",
            "⛔ ئابوونا تە ب دوماهیک هاتیە. نوو بکە بۆ بەردەوامیێ.",
            "⛔ بەشداریکردنەکەت بەسەرچووە. نوێی بکەرەوە بۆ بەردەوامبوون.",
        ]),
        "limit.daily" => Some([
            "🚫 وصلت الحد اليومي للتقارير. حاول غدا.",
            "🚫 Daily report limit reached. Try again tomorrow.",
            "🚫 سنوورێ رۆژانە یێ راپۆرتان ب دوماهیک هات. سوبەهی جارەکا دی هەول بدە.",
            "🚫 سنووری ڕۆژانەی ڕاپۆرتەکان تەواو بوو. سبەینێ هەوڵ بدەرەوە.",
        ]),
        "limit.monthly" => Some([
            "🚫 وصلت الحد الشهري للتقارير.",
            "🚫 Monthly report limit reached.",
            "🚫 سنوورێ هەیڤانە یێ راپۆرتان ب دوماهیک هات.",
            "🚫 سنووری مانگانەی ڕاپۆرتەکان تەواو بوو.",
        ]),
        "vin.invalid_format" => Some([
            "⚠️ رقم الشاصي غير صحيح. أرسل رقم شاصي من 17 خانة.",
            "⚠️ Invalid VIN. Send a 17-character chassis number.",
            "⚠️ ژمارا شاسی نە دروستە. ژمارەکا 17 خانە بهنێرە.",
            "⚠️ ژمارەی شاسی هەڵەیە. ژمارەیەکی 17 خانەیی بنێرە.",
        ]),
        "report.error.generic" => Some([
            "❌ حدث خطأ غير متوقع. حاول مرة أخرى.",
            "❌ Something went wrong. Please try again.",
            "❌ خەلەتیەک چێبوو. جارەکا دی هەول بدە.",
            "❌ هەڵەیەک ڕوویدا. جارێکی تر هەوڵ بدەرەوە.",
        ]),
        "report.error.fetch" => Some([
            "❌ تعذر جلب التقرير حاليا. حاول لاحقا.",
            "❌ Could not fetch the report right now. Try again later.",
            "❌ نەشیا راپۆرت بهێتە ئینان. پاشی هەول بدە.",
            "❌ نەتوانرا ڕاپۆرتەکە بهێنرێت. دواتر هەوڵ بدەرەوە.",
        ]),
        "report.error.timeout" => Some([
            "⏱ انتهت مهلة جلب التقرير. حاول مرة أخرى.",
            "⏱ Report request timed out. Please try again.",
            "⏱ دەمێ راپۆرتێ ب دوماهیک هات. جارەکا دی هەول بدە.",
            "⏱ کاتی ڕاپۆرتەکە تەواو بوو. جارێکی تر هەوڵ بدەرەوە.",
        ]),
        "report.error.invalid_vin" => Some([
            "⚠️ رقم الشاصي مرفوض من المزود. تأكد من الرقم.",
            "⚠️ The provider rejected this VIN. Check the number.",
            "⚠️ ژمارا شاسی هاتە رەتکرن. ژمارێ پشتراست بکە.",
            "⚠️ ژمارەی شاسییەکە ڕەتکرایەوە. لە ژمارەکە دڵنیابە.",
        ]),
        "report.error.delivery" => Some([
            "❌ تعذر إرسال ملف التقرير. حاول مرة أخرى.",
            "❌ Could not deliver the report file. Please try again.",
            "❌ نەشیا فایلێ راپۆرتێ بهێتە هنارتن. جارەکا دی هەول بدە.",
            "❌ نەتوانرا فایلی ڕاپۆرتەکە بنێردرێت. جارێکی تر هەوڵ بدەرەوە.",
        ]),
        "report.note.success" => Some([
            "✅ تم إصدار التقرير بنجاح.",
            "✅ Report delivered.",
            "✅ راپۆرت ب سەرکەفتیانە هاتە دەرئێخستن.",
            "✅ ڕاپۆرتەکە بە سەرکەوتوویی دەرچوو.",
        ]),
        "report.note.refund" => Some([
            "↩️ تمت إعادة الرصيد لحسابك.",
            "↩️ Your credit has been returned.",
            "↩️ باڵانسێ تە هاتە زڤراندن.",
            "↩️ باڵانسەکەت گەڕایەوە.",
        ]),
        "progress.header" => Some([
            "📊 المتبقي شهريا: {monthly} | اليوم: {daily} | الأيام: {days}\n🚗 الشاصي: {vin}",
            "📊 Monthly left: {monthly} | Today: {daily} | Days: {days}\n🚗 VIN: {vin}",
            "📊 مایی هەیڤانە: {monthly} | ئەڤرۆ: {daily} | رۆژ: {days}\n🚗 شاسی: {vin}",
            "📊 ماوەی مانگانە: {monthly} | ئەمڕۆ: {daily} | ڕۆژ: {days}\n🚗 شاسی: {vin}",
        ]),
        "progress.days.today" => Some(["اليوم", "today", "ئەڤرۆ", "ئەمڕۆ"]),
        "progress.days.expired" => Some(["منتهي", "expired", "ب دوماهیک هاتی", "بەسەرچوو"]),
        _ => None,
    }
}

/// Look up a template for `key` in `lang`.
///
/// Unknown languages fall back to English; an unknown key renders as the key
/// itself so a missing entry is visible instead of silent.
pub fn t(key: &str, lang: &str) -> String {
    let Some(templates) = entry(key) else {
        return key.to_owned();
    };
    let idx = match lang {
        "ar" => 0,
        "en" => 1,
        "ku" => 2,
        "ckb" => 3,
        _ => 1,
    };
    templates[idx].to_owned()
}

/// Render a template with `{name}` placeholders substituted.
pub fn tf(key: &str, lang: &str, vars: &[(&str, &str)]) -> String {
    let mut out = t(key, lang);
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;
