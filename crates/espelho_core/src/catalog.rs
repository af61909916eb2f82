//! crates/espelho_core/src/catalog.rs
//!
//! The fixed masters roster and Sombra question bank, injected into the
//! engine as configuration so tests can substitute small catalogs.

use serde::Deserialize;

/// The roster of masters commentary may cite, and the ordered question bank.
///
/// Question text doubles as the dedup key for "already answered" tracking,
/// so bank entries must stay stable once users have recorded answers.
#[derive(Debug, Clone, Deserialize)]
pub struct SombraCatalog {
    pub masters: Vec<String>,
    pub questions: Vec<String>,
}

impl Default for SombraCatalog {
    fn default() -> Self {
        Self {
            masters: DEFAULT_MASTERS.iter().map(|s| s.to_string()).collect(),
            questions: DEFAULT_QUESTIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// The 30 masters whose teachings ground the generated commentary.
const DEFAULT_MASTERS: &[&str] = &[
    "Amit Goswami",
    "Fred Alan Wolf",
    "John Hagelin",
    "William Tiller",
    "David Albert",
    "Stuart Hameroff",
    "Jeffrey Satinover",
    "Candace Pert",
    "Joe Dispenza",
    "Daniel Monti",
    "Elisabeth Kübler-Ross",
    "Ramtha (via JZ Knight)",
    "Fritjof Capra",
    "Carl Gustav Jung",
    "Hélio Couto",
    "Roger Penrose",
    "Henry Stapp",
    "David Bohm",
    "John Wheeler",
    "Werner Heisenberg",
    "Erwin Schrödinger",
    "Paul Davies",
    "Brian Josephson",
    "Dean Radin",
    "Lynne McTaggart",
    "Nassim Haramein",
    "Menas Kafatos",
    "Paul Levy",
    "Stuart Kauffman",
    "Jon Kabat-Zinn",
];

/// The Sombra question bank, in presentation order.
const DEFAULT_QUESTIONS: &[&str] = &[
    "Qual é a sua maior perda não aceita?",
    "Qual foi a primeira emoção que você sentiu ao perder algo importante?",
    "De 0 a 10, o quanto você acredita que precisa vencer para se sentir valioso?",
    "Quem na sua infância te condicionou a ser o melhor?",
    "Qual padrão você percebe em momentos de estresse?",
    "Qual frase da infância ainda ecoa na sua mente?",
    "Qual arquétipo você odeia nos outros?",
    "O que você faria se ninguém soubesse?",
    "Qual é o seu medo ao ganhar?",
    "Em uma palavra, o que você gostaria de mudar?",
    "Qual parte de você mesmo você mais rejeita?",
    "Que emoção você evita sentir a todo custo?",
    "Qual é a mentira que você conta para si mesmo?",
    "O que você julga nos outros que também existe em você?",
    "Qual é o seu maior medo sobre ser visto como realmente é?",
    "Que aspecto seu você esconde até de pessoas próximas?",
    "Qual comportamento seu te envergonha profundamente?",
    "O que você faria diferente se não tivesse medo do julgamento?",
    "Qual é a dor que você carrega em silêncio?",
    "Que parte da sua história você gostaria de reescrever?",
];
