//! The faker method registry: an immutable table of
//! `(dataset, method) → generator` built per locale at startup.
//!
//! Generators draw from a caller-owned `StdRng`, so a seeded run replays the
//! exact same sequence for a given locale and spec list. The table is fixed
//! per release and listable through the CLI.

use std::sync::Arc;

use fake::Fake;
use fake::locales::{AR_SA, DE_DE, Data, EN, FR_FR, IT_IT, JA_JP, PT_BR, ZH_CN};
use fake::rand::rngs::StdRng;
use fake::uuid::UUIDv4;
use tabdump_core::value::{date_to_epoch_days, time_to_midnight_micros};
use tabdump_core::{ExportError, LogicalType, Result, Value};

pub type GenerateFn = Arc<dyn Fn(&mut StdRng) -> Value + Send + Sync>;

pub struct FakeMethod {
    pub dataset: &'static str,
    pub method: &'static str,
    /// Advertised logical type of the generated values.
    pub returns: LogicalType,
    generate: GenerateFn,
}

impl FakeMethod {
    pub fn generator(&self) -> GenerateFn {
        Arc::clone(&self.generate)
    }

    pub fn generate(&self, rng: &mut StdRng) -> Value {
        (self.generate)(rng)
    }
}

pub struct FakerRegistry {
    methods: Vec<FakeMethod>,
}

impl FakerRegistry {
    /// Builds the table for a locale code such as `en`, `fr`, or `pt-BR`
    /// (only the language part is significant).
    pub fn for_locale(code: &str) -> Result<Self> {
        let language = code
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match language.as_str() {
            "" | "en" => Ok(Self::build(EN)),
            "fr" => Ok(Self::build(FR_FR)),
            "de" => Ok(Self::build(DE_DE)),
            "it" => Ok(Self::build(IT_IT)),
            "pt" => Ok(Self::build(PT_BR)),
            "ja" => Ok(Self::build(JA_JP)),
            "zh" => Ok(Self::build(ZH_CN)),
            "ar" => Ok(Self::build(AR_SA)),
            other => Err(ExportError::Config(format!(
                "unsupported faker locale `{other}`"
            ))),
        }
    }

    pub fn methods(&self) -> &[FakeMethod] {
        &self.methods
    }

    pub fn has_dataset(&self, dataset: &str) -> bool {
        self.methods
            .iter()
            .any(|m| m.dataset.eq_ignore_ascii_case(dataset))
    }

    pub fn get(&self, dataset: &str, method: &str) -> Option<&FakeMethod> {
        self.methods.iter().find(|m| {
            m.dataset.eq_ignore_ascii_case(dataset) && m.method.eq_ignore_ascii_case(method)
        })
    }

    fn build<L: Data + Copy + Send + Sync + 'static + fake::faker::impls::address::CityNameGenFn>(
        locale: L,
    ) -> Self {
        use fake::faker::{
            address, boolean, chrono as dates, company, currency, internet, job, lorem, name,
            phone_number,
        };

        let mut methods: Vec<FakeMethod> = Vec::new();
        let mut put = |dataset, method, returns, generate: GenerateFn| {
            methods.push(FakeMethod {
                dataset,
                method,
                returns,
                generate,
            });
        };

        macro_rules! text {
            ($ds:literal, $m:literal, $faker:expr) => {
                put(
                    $ds,
                    $m,
                    LogicalType::String,
                    Arc::new(move |rng| Value::Str($faker.fake_with_rng::<String, _>(rng))),
                )
            };
        }

        text!("name", "firstname", name::raw::FirstName(locale));
        text!("name", "lastname", name::raw::LastName(locale));
        text!("name", "name", name::raw::Name(locale));
        text!("name", "title", name::raw::Title(locale));
        text!("name", "suffix", name::raw::Suffix(locale));

        text!("address", "buildingnumber", address::raw::BuildingNumber(locale));
        text!("address", "city", address::raw::CityName(locale));
        text!("address", "country", address::raw::CountryName(locale));
        text!("address", "state", address::raw::StateName(locale));
        text!("address", "street", address::raw::StreetName(locale));
        text!("address", "zipcode", address::raw::ZipCode(locale));

        text!("internet", "domainsuffix", internet::raw::DomainSuffix(locale));
        text!("internet", "email", internet::raw::FreeEmail(locale));
        text!("internet", "ipv4", internet::raw::IPv4(locale));
        text!("internet", "ipv6", internet::raw::IPv6(locale));
        text!("internet", "mac", internet::raw::MACAddress(locale));
        text!("internet", "password", internet::raw::Password(locale, 12..20));
        text!("internet", "safeemail", internet::raw::SafeEmail(locale));
        text!("internet", "useragent", internet::raw::UserAgent(locale));
        text!("internet", "username", internet::raw::Username(locale));

        text!("company", "buzzword", company::raw::Buzzword(locale));
        text!("company", "industry", company::raw::Industry(locale));
        text!("company", "name", company::raw::CompanyName(locale));
        text!("company", "profession", company::raw::Profession(locale));
        text!("company", "suffix", company::raw::CompanySuffix(locale));

        text!("phone", "cell", phone_number::raw::CellNumber(locale));
        text!("phone", "number", phone_number::raw::PhoneNumber(locale));

        text!("lorem", "paragraph", lorem::raw::Paragraph(locale, 2..5));
        text!("lorem", "sentence", lorem::raw::Sentence(locale, 4..10));
        text!("lorem", "word", lorem::raw::Word(locale));

        text!("currency", "code", currency::raw::CurrencyCode(locale));
        text!("currency", "name", currency::raw::CurrencyName(locale));
        text!("currency", "symbol", currency::raw::CurrencySymbol(locale));

        text!("job", "field", job::raw::Field(locale));
        text!("job", "position", job::raw::Position(locale));
        text!("job", "title", job::raw::Title(locale));

        put(
            "date",
            "date",
            LogicalType::Date,
            Arc::new(move |rng| {
                let ts: chrono::DateTime<chrono::Utc> =
                    dates::raw::DateTime(locale).fake_with_rng(rng);
                Value::Date(date_to_epoch_days(ts.date_naive()))
            }),
        );
        put(
            "date",
            "datetime",
            LogicalType::Timestamp,
            Arc::new(move |rng| {
                let ts: chrono::DateTime<chrono::Utc> =
                    dates::raw::DateTime(locale).fake_with_rng(rng);
                Value::Timestamp(ts.timestamp_micros())
            }),
        );
        put(
            "date",
            "time",
            LogicalType::Time,
            Arc::new(move |rng| {
                let ts: chrono::DateTime<chrono::Utc> =
                    dates::raw::DateTime(locale).fake_with_rng(rng);
                Value::Time(time_to_midnight_micros(ts.time()))
            }),
        );

        put(
            "boolean",
            "boolean",
            LogicalType::Boolean,
            Arc::new(move |rng| {
                Value::Boolean(boolean::raw::Boolean(locale, 50).fake_with_rng(rng))
            }),
        );

        put(
            "uuid",
            "v4",
            LogicalType::Uuid,
            Arc::new(|rng| Value::Uuid(UUIDv4.fake_with_rng::<uuid::Uuid, _>(rng))),
        );

        Self { methods }
    }
}
