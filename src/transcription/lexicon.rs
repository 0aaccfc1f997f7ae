//! # Lexical Correction
//!
//! Corrects transcribed text against a static dictionary of Pāli terms.
//! Speech engines reliably mangle Pāli vocabulary ("dharma", "nirvana",
//! "sankha"), so every known variant is rewritten to its canonical romanized
//! form with diacritics.
//!
//! ## Properties:
//! - whole-word, case-insensitive matching only; substrings never match
//! - variants are applied longest-first so long variants are not shadowed by
//!   shorter ones matching inside them
//! - the casing pattern of the matched text is preserved (ALL-CAPS stays
//!   ALL-CAPS, Title Case stays Title Case)
//! - the transform is idempotent: correcting already-corrected text is a
//!   no-op

use regex::Regex;

/// Variant → canonical spelling pairs for Pāli terms.
///
/// Grouped roughly by topic; later entries never override earlier ones at
/// runtime because each variant appears exactly once.
pub const PALI_CORRECTIONS: &[(&str, &str)] = &[
    // Core concepts
    ("buddha", "Buddha"),
    ("budha", "Buddha"),
    ("budhha", "Buddha"),
    ("dharma", "Dhamma"),
    ("darma", "Dhamma"),
    ("dhamma", "Dhamma"),
    ("sangha", "Saṅgha"),
    ("sanga", "Saṅgha"),
    ("sankha", "Saṅgha"),
    ("nirvana", "Nibbāna"),
    ("nirvāna", "Nibbāna"),
    ("nibbana", "Nibbāna"),
    ("nibbāna", "Nibbāna"),
    ("karma", "Kamma"),
    ("karman", "Kamma"),
    ("kamma", "Kamma"),
    ("samsara", "Saṃsāra"),
    ("sansara", "Saṃsāra"),
    ("saṃsāra", "Saṃsāra"),
    // Meditation terms
    ("vipassana", "Vipassanā"),
    ("vipassanā", "Vipassanā"),
    ("vipasana", "Vipassanā"),
    ("samatha", "Samatha"),
    ("shamatha", "Samatha"),
    ("samadhi", "Samādhi"),
    ("samādhī", "Samādhi"),
    ("jhana", "Jhāna"),
    ("jhaana", "Jhāna"),
    ("jhāna", "Jhāna"),
    ("dhyana", "Jhāna"),
    ("mindfulness", "Sati"),
    ("sati", "Sati"),
    ("satii", "Sati"),
    ("satipatthana", "Satipaṭṭhāna"),
    ("satipattana", "Satipaṭṭhāna"),
    // Four Noble Truths and Eightfold Path
    ("dukkha", "Dukkha"),
    ("dukha", "Dukkha"),
    ("suffering", "Dukkha"),
    ("tanha", "Taṇhā"),
    ("trishna", "Taṇhā"),
    ("taṇhā", "Taṇhā"),
    ("craving", "Taṇhā"),
    ("magga", "Magga"),
    ("marga", "Magga"),
    ("eightfold", "Aṭṭhaṅgika"),
    ("noble", "Ariya"),
    ("arya", "Ariya"),
    ("ariya", "Ariya"),
    // Precepts and ethics
    ("sila", "Sīla"),
    ("seela", "Sīla"),
    ("sīla", "Sīla"),
    ("sheela", "Sīla"),
    ("precept", "Sīla"),
    ("precepts", "Sīla"),
    ("panna", "Paññā"),
    ("prajna", "Paññā"),
    ("paññā", "Paññā"),
    ("panya", "Paññā"),
    ("panjja", "Paññā"),
    ("prajñā", "Paññā"),
    ("pannya", "Paññā"),
    ("wisdom", "Paññā"),
    // Monastic terms
    ("bhikkhu", "Bhikkhu"),
    ("bikhu", "Bhikkhu"),
    ("bhikku", "Bhikkhu"),
    ("monk", "Bhikkhu"),
    ("bhikkhuni", "Bhikkhunī"),
    ("bikkhuni", "Bhikkhunī"),
    ("bhikkhunī", "Bhikkhunī"),
    ("bhikkuni", "Bhikkhunī"),
    ("nun", "Bhikkhunī"),
    ("uposatha", "Uposatha"),
    ("upasampadā", "Upasampadā"),
    ("upasampada", "Upasampadā"),
    // Texts and teachings
    ("sutta", "Sutta"),
    ("sutra", "Sutta"),
    ("tripitaka", "Tipiṭaka"),
    ("tipitaka", "Tipiṭaka"),
    ("tipiṭaka", "Tipiṭaka"),
    ("abhidhamma", "Abhidhamma"),
    ("abhidharma", "Abhidhamma"),
    ("vinaya", "Vinaya"),
    ("pali", "Pāli"),
    ("paali", "Pāli"),
    ("pāli", "Pāli"),
    // Common Pāli words
    ("metta", "Mettā"),
    ("mettā", "Mettā"),
    ("meta", "Mettā"),
    ("loving", "Mettā"),
    ("karuna", "Karuṇā"),
    ("karuṇā", "Karuṇā"),
    ("compassion", "Karuṇā"),
    ("mudita", "Muditā"),
    ("muditā", "Muditā"),
    ("joy", "Muditā"),
    ("upekkha", "Upekkhā"),
    ("upekkhā", "Upekkhā"),
    ("upexa", "Upekkhā"),
    ("equanimity", "Upekkhā"),
    ("anicca", "Anicca"),
    ("annica", "Anicca"),
    ("impermanence", "Anicca"),
    ("anatta", "Anattā"),
    ("anattā", "Anattā"),
    ("anatman", "Anattā"),
    ("selflessness", "Anattā"),
    // Places and people
    ("bodhi", "Bodhi"),
    ("bodhisattva", "Bodhisatta"),
    ("bodhisatta", "Bodhisatta"),
    ("tathagata", "Tathāgata"),
    ("tathāgata", "Tathāgata"),
    ("gaya", "Gayā"),
    ("gayā", "Gayā"),
    ("varanasi", "Vārāṇasī"),
    ("benares", "Vārāṇasī"),
    ("vārāṇasī", "Vārāṇasī"),
    ("sarnath", "Sārnāth"),
    ("sārnāth", "Sārnāth"),
    // Festivals and ceremonies
    ("vesak", "Vesākha"),
    ("vesākha", "Vesākha"),
    ("wesak", "Vesākha"),
    ("kathina", "Kaṭhina"),
    ("kaṭhina", "Kaṭhina"),
    ("paritta", "Paritta"),
    ("parita", "Paritta"),
    // Common mispronunciations
    ("namo", "Namo"),
    ("nama", "Namo"),
    ("namaste", "Namaste"),
    ("sabbe", "Sabbe"),
    ("sabe", "Sabbe"),
    ("satta", "Satta"),
    ("bhava", "Bhava"),
    ("bava", "Bhava"),
    ("become", "Bhava"),
    ("becoming", "Bhava"),
];

/// Case-preserving whole-word term corrector.
///
/// Compiles one regex per variant at construction so repeated corrections on
/// a hot path pay no recompilation cost. Construct once (it lives in the
/// shared application state) and reuse.
pub struct TermCorrector {
    /// (compiled whole-word pattern, canonical form), longest variant first.
    rules: Vec<(Regex, String)>,
}

impl TermCorrector {
    /// Build a corrector from variant → canonical pairs.
    pub fn new(dictionary: &[(&str, &str)]) -> Self {
        let mut entries: Vec<(&str, &str)> = dictionary.to_vec();
        // Longest variant first so e.g. "satipatthana" is rewritten before
        // "sati" gets a chance to match inside it.
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));

        let rules = entries
            .into_iter()
            .map(|(variant, canonical)| {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(variant));
                // Patterns are built from escaped literals, so compilation
                // cannot fail on any dictionary entry.
                let regex = Regex::new(&pattern).expect("escaped literal pattern");
                (regex, canonical.to_string())
            })
            .collect();

        Self { rules }
    }

    /// Corrector loaded with the Pāli dictionary.
    pub fn pali() -> Self {
        Self::new(PALI_CORRECTIONS)
    }

    /// Apply all corrections to `text`, preserving the casing pattern of
    /// each matched word. Deterministic single pass per rule, no
    /// backtracking, idempotent.
    pub fn correct(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }

        let mut corrected = text.to_string();
        for (regex, canonical) in &self.rules {
            if !regex.is_match(&corrected) {
                continue;
            }
            corrected = regex
                .replace_all(&corrected, |caps: &regex::Captures<'_>| {
                    preserve_case(&caps[0], canonical)
                })
                .into_owned();
        }
        corrected
    }
}

/// Map the canonical form onto the casing pattern of the matched text.
fn preserve_case(matched: &str, canonical: &str) -> String {
    if is_all_uppercase(matched) {
        canonical.to_uppercase()
    } else if is_title_case(matched) && is_all_lowercase(canonical) {
        title_case(canonical)
    } else {
        canonical.to_string()
    }
}

fn is_all_uppercase(word: &str) -> bool {
    let mut has_alpha = false;
    for c in word.chars().filter(|c| c.is_alphabetic()) {
        has_alpha = true;
        if !c.is_uppercase() {
            return false;
        }
    }
    has_alpha
}

fn is_all_lowercase(word: &str) -> bool {
    let mut has_alpha = false;
    for c in word.chars().filter(|c| c.is_alphabetic()) {
        has_alpha = true;
        if !c.is_lowercase() {
            return false;
        }
    }
    has_alpha
}

fn is_title_case(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) if first.is_uppercase() => chars.all(|c| !c.is_alphabetic() || c.is_lowercase()),
        _ => false,
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_correction() {
        let corrector = TermCorrector::pali();
        assert_eq!(
            corrector.correct("the buddha taught the dharma"),
            "the Buddha taught the Dhamma"
        );
    }

    #[test]
    fn test_case_preservation() {
        let corrector = TermCorrector::pali();
        assert_eq!(corrector.correct("BUDDHA"), "BUDDHA");
        assert_eq!(corrector.correct("Buddha"), "Buddha");
        assert_eq!(corrector.correct("buddha"), "Buddha");
        // ALL-CAPS propagates through a spelling change too.
        assert_eq!(corrector.correct("NIRVANA"), "NIBBĀNA");
        assert_eq!(corrector.correct("nirvana"), "Nibbāna");
    }

    #[test]
    fn test_whole_word_only() {
        let corrector = TermCorrector::pali();
        // "karma" inside another word must not be rewritten.
        assert_eq!(corrector.correct("karmapa"), "karmapa");
        assert_eq!(corrector.correct("karma"), "Kamma");
    }

    #[test]
    fn test_longest_variant_wins() {
        let corrector = TermCorrector::pali();
        // "satipatthana" contains "sati"; the long variant must be applied
        // as a unit rather than leaving "Satipatthana" half-corrected.
        assert_eq!(corrector.correct("satipatthana"), "Satipaṭṭhāna");
        assert_eq!(corrector.correct("practice sati daily"), "practice Sati daily");
    }

    #[test]
    fn test_idempotent() {
        let corrector = TermCorrector::pali();
        let inputs = [
            "the buddha spoke of dharma, karma and nirvana",
            "SANGHA and sangha and Sangha",
            "A monk practices vipassana with metta.",
            "nothing to correct here",
            "",
        ];
        for input in inputs {
            let once = corrector.correct(input);
            let twice = corrector.correct(&once);
            assert_eq!(once, twice, "correction not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_never_drops_words() {
        let corrector = TermCorrector::pali();
        let input = "the monk taught metta to the sangha in varanasi";
        let output = corrector.correct(input);
        assert_eq!(
            input.split_whitespace().count(),
            output.split_whitespace().count()
        );
    }

    #[test]
    fn test_diacritic_variant_normalizes() {
        let corrector = TermCorrector::pali();
        assert_eq!(corrector.correct("nibbāna"), "Nibbāna");
        assert_eq!(corrector.correct("paññā"), "Paññā");
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        let corrector = TermCorrector::pali();
        assert_eq!(corrector.correct(""), "");
        assert_eq!(corrector.correct("   "), "   ");
    }
}
