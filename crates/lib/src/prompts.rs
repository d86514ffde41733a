//! Starter prompt suggestions shown on an empty chat.

use rand::seq::SliceRandom;

/// Fixed suggestion pool; sampling draws from this list only.
pub const STARTER_PROMPTS: [&str; 12] = [
    "What can you help me with?",
    "Tell me a joke",
    "Explain how blockchain works",
    "What is Rust good for?",
    "Give me a motivational quote",
    "Share an interesting fact",
    "What are the most popular technologies right now?",
    "Recommend a board game for two players",
    "How do I start learning programming?",
    "What makes a healthy daily routine?",
    "Suggest a movie for tonight",
    "Where should I travel next?",
];

/// Three distinct suggestions sampled from the fixed pool.
pub fn random_user_messages() -> Vec<String> {
    let mut rng = rand::thread_rng();
    STARTER_PROMPTS
        .choose_multiple(&mut rng, 3)
        .map(|s| s.to_string())
        .collect()
}
