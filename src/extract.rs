use anyhow::{Context, Result};
use regex::Regex;

pub fn normalize_url(url: &str) -> String {
    url.trim().to_lowercase()
}

#[derive(Debug, Clone)]
pub struct FieldExtractor {
    integer: Regex,
    square_meters: Regex,
    price_number: Regex,
    total_results: Regex,
}

impl FieldExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            integer: Regex::new(r"[0-9]+").context("failed to compile integer regex")?,
            square_meters: Regex::new(r"([0-9,.]+)\s?m")
                .context("failed to compile square meters regex")?,
            price_number: Regex::new(r"[0-9]+(\.[0-9]+)?")
                .context("failed to compile price regex")?,
            total_results: Regex::new(r"de\s+([0-9.]+)\s+resultados")
                .context("failed to compile result counter regex")?,
        })
    }

    pub fn extract_int(&self, text: &str) -> Option<u32> {
        self.integer
            .find(text)
            .and_then(|found| found.as_str().parse::<u32>().ok())
    }

    pub fn extract_square_meters(&self, text: &str) -> Option<f64> {
        let lowered = text.to_lowercase();
        let captures = self.square_meters.captures(&lowered)?;
        let token = captures.get(1)?.as_str().replace(',', ".");
        token.parse::<f64>().ok()
    }

    // Assumes European formatting: dots are thousands separators, commas decimals.
    // "1234.56" therefore reads as 123456.
    pub fn extract_price(&self, text: &str) -> Option<f64> {
        let cleaned = text
            .chars()
            .filter(|character| *character != '€' && !character.is_whitespace())
            .filter(|character| *character != '.')
            .map(|character| if character == ',' { '.' } else { character })
            .collect::<String>();

        self.price_number
            .find(&cleaned)
            .and_then(|found| found.as_str().parse::<f64>().ok())
    }

    pub fn extract_total_results(&self, text: &str) -> Option<u64> {
        let captures = self.total_results.captures(text)?;
        captures.get(1)?.as_str().replace('.', "").parse::<u64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> FieldExtractor {
        FieldExtractor::new().expect("extractor regexes compile")
    }

    #[test]
    fn extract_int_takes_first_digit_run() {
        let extractor = extractor();
        assert_eq!(extractor.extract_int("3 hab."), Some(3));
        assert_eq!(extractor.extract_int("baños: 2 de 4"), Some(2));
        assert_eq!(extractor.extract_int("12345 visitas"), Some(12345));
    }

    #[test]
    fn extract_int_is_absent_without_digits() {
        let extractor = extractor();
        assert_eq!(extractor.extract_int("sin datos"), None);
        assert_eq!(extractor.extract_int(""), None);
    }

    #[test]
    fn extract_int_ignores_sign_and_separators() {
        let extractor = extractor();
        assert_eq!(extractor.extract_int("-7 plantas"), Some(7));
        assert_eq!(extractor.extract_int("1.200"), Some(1));
    }

    #[test]
    fn extract_int_overflow_is_absent() {
        assert_eq!(extractor().extract_int("99999999999999"), None);
    }

    #[test]
    fn extract_square_meters_handles_units_and_decimal_comma() {
        let extractor = extractor();
        assert_eq!(extractor.extract_square_meters("85 m²"), Some(85.0));
        assert_eq!(extractor.extract_square_meters("85,5m"), Some(85.5));
        assert_eq!(extractor.extract_square_meters("120.25 M2"), Some(120.25));
        assert_eq!(extractor.extract_square_meters("garaje"), None);
        assert_eq!(extractor.extract_square_meters("3 hab."), None);
    }

    #[test]
    fn extract_square_meters_rejects_unparseable_token() {
        assert_eq!(extractor().extract_square_meters("1.234.5 m"), None);
    }

    #[test]
    fn extract_price_reads_european_format() {
        let extractor = extractor();
        assert_eq!(extractor.extract_price("950.000 €"), Some(950000.0));
        assert_eq!(extractor.extract_price("423.500,75 €"), Some(423500.75));
        assert_eq!(extractor.extract_price("1.250.000\u{a0}€"), Some(1250000.0));
        assert_eq!(extractor.extract_price(""), None);
        assert_eq!(extractor.extract_price("A consultar"), None);
    }

    #[test]
    fn extract_price_strips_dots_unconditionally() {
        assert_eq!(extractor().extract_price("1234.56"), Some(123456.0));
    }

    #[test]
    fn extract_total_results_reads_counter() {
        let extractor = extractor();
        assert_eq!(
            extractor.extract_total_results("1 - 30 de 245 resultados"),
            Some(245)
        );
        assert_eq!(
            extractor.extract_total_results("1 - 30 de 1.245 resultados"),
            Some(1245)
        );
        assert_eq!(extractor.extract_total_results("sin resultados"), None);
    }

    #[test]
    fn normalize_url_trims_and_lowercases() {
        assert_eq!(
            normalize_url("  https://www.Pisos.com/Comprar/Piso-1/ \n"),
            "https://www.pisos.com/comprar/piso-1/"
        );
    }
}
